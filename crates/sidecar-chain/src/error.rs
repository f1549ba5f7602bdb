use sidecar_exec::ExecError;
use sidecar_friend::FriendError;
use sidecar_io::TreeError;
use sidecar_types::TypeError;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("friend error: {0}")]
    Friend(#[from] FriendError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("execution error: {0}")]
    Exec(#[from] ExecError),
}

pub type ChainResult<T> = Result<T, ChainError>;
