use crate::domain::model::{AreaOfInterest, SceneRecord, SearchWindow};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Spatio-temporal scene search. Implemented by the STAC client;
/// tests substitute their own.
#[async_trait]
pub trait SceneCatalog: Send + Sync {
    /// Returns every raw catalog match for the AOI and window, in the
    /// API's page order. An empty vec is a valid outcome, not an error.
    async fn search(
        &self,
        aoi: &AreaOfInterest,
        window: &SearchWindow,
    ) -> Result<Vec<SceneRecord>>;
}

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
