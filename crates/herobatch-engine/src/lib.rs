pub mod builder;
pub mod config;
pub mod fetch;
pub mod loader;
pub mod pipeline;
pub mod poll;
pub mod reconcile;
pub mod services;
pub mod submit;

pub use builder::RequestBuilder;
pub use config::PipelineConfig;
pub use fetch::{AssetFetcher, AssetSource, FetchedAsset, HttpAssetSource, MediaType};
pub use loader::{load_products, parse_products, ProductTable};
pub use pipeline::{BatchPipeline, BatchStatus, RunReport};
pub use poll::{PollOutcome, PollPolicy, PollStep};
pub use reconcile::{ReconcileReport, Reconciler, SavedImage};
pub use services::{DryrunService, GeminiService, GenerationService};
pub use submit::{BatchOutcome, BatchSubmitter, SubmittedBatch};
