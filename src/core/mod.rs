pub mod catalog;
pub mod clipper;
pub mod engine;
pub mod geometry;
pub mod retriever;
pub mod selector;
pub mod writer;

pub use crate::domain::model::{AreaOfInterest, RunReport, SceneRecord, SearchWindow};
pub use crate::domain::ports::{SceneCatalog, Storage};
pub use crate::utils::error::Result;
