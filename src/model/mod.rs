pub mod event;
pub mod message;
pub mod room;

pub use event::{PushOutcome, SideEffect};
pub use message::{
    Attachment, AttachmentDto, ChatMessage, MessageDto, MessageKind, SendMessageRequest,
    WireMessageType,
};
pub use room::{ChatRoom, MembershipStatus, Participant, RoomPreview};
