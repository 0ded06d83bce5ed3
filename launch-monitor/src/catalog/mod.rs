pub mod client;
pub mod selection;
pub mod types;

pub use client::{CatalogClient, DiscoveryParams};
pub use selection::{select_project, SelectionParams};
pub use types::{
    FactoryTag, Page, PoolType, Project, ProjectSort, ProjectStatus, SelectedProject,
};
