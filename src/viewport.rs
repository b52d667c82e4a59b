use std::collections::HashMap;

/// 顶部回填触发阈值（px）
pub const TOP_BACKFILL_THRESHOLD: f64 = 100.0;
/// 贴底自动滚动阈值（px）
pub const NEAR_BOTTOM_THRESHOLD: f64 = 120.0;
/// 默认预估行高（px）
pub const DEFAULT_ITEM_HEIGHT: f64 = 80.0;
/// 可视范围上下多物化的行数
pub const DEFAULT_OVERSCAN: usize = 5;

/// 新消息到达时的滚动策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    /// 贴底：自动滚到底部
    StickToBottom,
    /// 读者正在上翻，保持原位
    Preserve,
}

/// 向前翻页前记录的滚动锚点
///
/// 必须在 DOM 变更、布局垂直解析完成之后（下一帧）应用，
/// 用高度差修正 scroll_top，避免视觉跳动。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrependAnchor {
    pub scroll_height: f64,
    pub scroll_top: f64,
}

/// 可视范围与上下占位
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleSlice {
    /// 物化区间 [start, end]（含端点）
    pub start: usize,
    pub end: usize,
    pub top_padding: f64,
    pub bottom_padding: f64,
}

/// 虚拟化视口（纯几何计算，不持有消息）
///
/// 行高先用预估值，实测后逐行修正，后续范围计算随之更准。
#[derive(Debug)]
pub struct Viewport {
    item_height: f64,
    overscan: usize,
    heights: HashMap<usize, f64>,
    container_height: f64,
    scroll_top: f64,
}

impl Viewport {
    pub fn new(item_height: f64, overscan: usize) -> Self {
        Self {
            item_height,
            overscan,
            heights: HashMap::new(),
            container_height: 0.0,
            scroll_top: 0.0,
        }
    }

    /// 房间切换时重置
    pub fn reset(&mut self) {
        self.heights.clear();
        self.scroll_top = 0.0;
    }

    pub fn set_container_height(&mut self, height: f64) {
        self.container_height = height;
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    /// 实测某行高度（ResizeObserver 回调）
    pub fn measure_item(&mut self, index: usize, height: f64) {
        self.heights.insert(index, height);
    }

    fn height_of(&self, index: usize) -> f64 {
        self.heights.get(&index).copied().unwrap_or(self.item_height)
    }

    /// 全部行的总高度（实测优先，缺省用预估）
    pub fn total_height(&self, count: usize) -> f64 {
        (0..count).map(|i| self.height_of(i)).sum()
    }

    /// 距底部距离
    pub fn distance_from_bottom(&self, count: usize) -> f64 {
        (self.total_height(count) - self.scroll_top - self.container_height).max(0.0)
    }

    /// 滚动事件：更新位置，返回是否应触发顶部回填
    pub fn on_scroll(&mut self, scroll_top: f64) -> bool {
        self.scroll_top = scroll_top.max(0.0);
        self.scroll_top < TOP_BACKFILL_THRESHOLD
    }

    /// 新消息到达时的滚动策略
    pub fn arrival_policy(&self, count: usize) -> ScrollAction {
        if self.distance_from_bottom(count) < NEAR_BOTTOM_THRESHOLD {
            ScrollAction::StickToBottom
        } else {
            ScrollAction::Preserve
        }
    }

    /// 滚到底部
    pub fn scroll_to_bottom(&mut self, count: usize) {
        self.scroll_top = (self.total_height(count) - self.container_height).max(0.0);
    }

    /// 初始锚定：有未读则把首条未读滚到视口中央，否则滚到底
    pub fn anchor_initial(&mut self, count: usize, first_unread: Option<usize>) {
        match first_unread {
            Some(index) if index < count => {
                let offset: f64 = (0..index).map(|i| self.height_of(i)).sum();
                let centered =
                    offset - (self.container_height - self.height_of(index)) / 2.0;
                let max = (self.total_height(count) - self.container_height).max(0.0);
                self.scroll_top = centered.clamp(0.0, max);
            }
            _ => self.scroll_to_bottom(count),
        }
    }

    /// 向前翻页前记录锚点
    pub fn record_anchor(&self, count: usize) -> PrependAnchor {
        PrependAnchor {
            scroll_height: self.total_height(count),
            scroll_top: self.scroll_top,
        }
    }

    /// 翻页接入 `inserted` 行后应用锚点：
    /// 实测高度索引整体后移，scroll_top 加上高度差。
    /// 必须先做本修正、再重算可视范围。
    pub fn apply_anchor(&mut self, anchor: PrependAnchor, inserted: usize, new_count: usize) {
        if inserted > 0 && !self.heights.is_empty() {
            let mut shifted = HashMap::with_capacity(self.heights.len());
            for (idx, h) in self.heights.drain() {
                shifted.insert(idx + inserted, h);
            }
            self.heights = shifted;
        }
        let height_diff = self.total_height(new_count) - anchor.scroll_height;
        self.scroll_top = (anchor.scroll_top + height_diff).max(0.0);
    }

    /// 计算应物化的消息区间与上下占位
    pub fn visible_slice(&self, count: usize) -> VisibleSlice {
        if count == 0 {
            return VisibleSlice {
                start: 0,
                end: 0,
                top_padding: 0.0,
                bottom_padding: 0.0,
            };
        }

        let mut accumulated = 0.0;
        let mut start = 0;
        for i in 0..count {
            let h = self.height_of(i);
            if accumulated + h > self.scroll_top {
                start = i.saturating_sub(self.overscan);
                break;
            }
            accumulated += h;
        }

        let visible_bottom = self.scroll_top + self.container_height;
        let mut end = count - 1;
        accumulated = 0.0;
        for i in start..count {
            accumulated += self.height_of(i);
            if accumulated >= visible_bottom {
                end = (i + self.overscan).min(count - 1);
                break;
            }
        }

        let top_padding: f64 = (0..start).map(|i| self.height_of(i)).sum();
        let bottom_padding: f64 = (end + 1..count).map(|i| self.height_of(i)).sum();

        VisibleSlice {
            start,
            end,
            top_padding,
            bottom_padding,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(DEFAULT_ITEM_HEIGHT, DEFAULT_OVERSCAN)
    }
}
