pub mod error;
mod middleware;
pub mod proxy;
mod slides;

use std::{path::PathBuf, sync::Arc};

pub use error::ApiError;
pub use proxy::{PreviewProxy, ProxyError};
pub use slides::build_router;

use crate::{
    application::{build::BuildPipeline, catalog::DeckCatalog, locks::DeckLocks},
    infra::presentations::PresentationStore,
    runtime::{PublicPaths, RendererSupervisor},
};

#[derive(Clone)]
pub struct HttpState {
    pub catalog: Arc<dyn DeckCatalog>,
    pub supervisor: RendererSupervisor,
    pub locks: DeckLocks,
    pub builds: BuildPipeline,
    pub presentations: PresentationStore,
    pub proxy: PreviewProxy,
    pub screenshots_dir: PathBuf,
    pub paths: PublicPaths,
}
