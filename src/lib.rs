pub mod archive;
pub mod classifier;
pub mod dir_image;
pub mod error;
pub mod lock;
pub mod notifier;
pub mod pull;
pub mod push;
pub mod registry;
pub mod rewriter;
pub mod tar_extractor;

// Re-exports for easy access
pub use archive::{PackagedArtifact, TarImage};
pub use classifier::{ArtifactKind, PullIntent};
pub use dir_image::DirImage;
pub use error::{Error, Result, UsageError};
pub use lock::{BundleLock, ImageLock};
pub use notifier::Notifier;
pub use pull::{PullOptions, PullOutcome, Puller, RefSource};
pub use push::{PushOptions, PushOutcome, Pusher};
pub use registry::{ImageWriter, ImagesMetadata, MemoryRegistry, RegistryClient, RegistryOpts};
pub use rewriter::{LockRewriter, RewriteOutcome};
