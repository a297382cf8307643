pub mod block;
pub mod directory;
pub mod errors;
pub mod frame;
pub mod header;
pub mod names;
pub mod namespace;
pub mod retry;

pub use block::{Mailbox, ReadStatus, WriteStatus};
pub use directory::{ChannelDirectory, ShmDirectory};
pub use errors::MailboxError;
pub use frame::{Frame, FrameShape};
pub use namespace::Namespace;
