//! Kernel module - pipeline infrastructure and dependencies.

pub mod deps;
pub mod server_kernel;
pub mod test_dependencies;
pub mod traits;
pub mod worker;

pub use deps::{
    FsObjectStorage, HttpMediaFetcher, HttpOAuthClient, HttpPlatformGateway, PassthroughCipher,
};
pub use server_kernel::Kernel;
pub use test_dependencies::{
    FakeGateway, FakeMediaFetcher, FakeOAuthClient, MemoryObjectStorage, StubCipher,
    TestDependencies,
};
pub use traits::*;
pub use worker::{run_worker, PipelineWorker, WorkerConfig};
