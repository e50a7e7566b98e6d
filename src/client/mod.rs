//! Client side of the compilation service: the metadata interface the VM
//! implements and the responder that turns it into wire replies.

pub mod provider;
pub mod responder;

pub use provider::{MetadataProvider, ResolutionAnswer, SignatureAnswer};
pub use responder::ClientResponder;
