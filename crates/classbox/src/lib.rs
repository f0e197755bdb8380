pub mod api;
pub mod error;
pub mod license;
pub mod pipeline;
pub mod scramble;
pub mod tools;

pub use api::Api;
pub use error::{ClassboxError, ClassboxResult};
pub use license::{LicenseClient, LicenseMaterial, Session, SignedCookies};
pub use pipeline::{
    Pipeline, PipelineConfig, PipelineError, PipelineEvent, PipelineObserver, PipelineOutcome,
    PipelinePhase,
};
pub use tools::{Decrypter, FfmpegMux, Mp4Decrypt, Muxer};
