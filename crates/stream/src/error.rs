use chunkspace_kernel::GraphError;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid stream config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid stream config: {0}")]
    Config(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("unknown space {0}")]
    UnknownSpace(u32),
    #[error("loader thread has stopped")]
    LoaderGone,
}
