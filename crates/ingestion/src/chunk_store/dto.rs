use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AssembleResult {
    pub size: u64,
    pub path: PathBuf,
}
