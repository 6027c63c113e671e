use crate::entity::{EntityKind, Uid};
use crate::position::Position;

#[derive(Debug, thiserror::Error)]
pub enum DocFlowError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("font error: {0}")]
    Font(String),
    #[error("no font matches {face} {style} at {size}px")]
    FontNotFound {
        face: String,
        style: String,
        size: i32,
    },
    #[error("entity {0} is not present in the store")]
    EntityNotFound(Uid),
    #[error("entity {uid} is a {found}, expected {expected}")]
    KindMismatch {
        uid: Uid,
        expected: EntityKind,
        found: EntityKind,
    },
    #[error("position {0} does not address the stream")]
    InvalidPosition(Position),
    #[error("position {0} does not address a text entity")]
    NotText(Position),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, DocFlowError>;
