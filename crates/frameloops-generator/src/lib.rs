mod artifact;
mod command;
mod output;
mod spawner;
mod traits;

pub use artifact::ArtifactHandle;
pub use command::CommandGenerator;
pub use output::ProcessOutput;
pub use spawner::ProcessSpawner;
pub use traits::{
    CommandConfig, GenerationMode, GenerationRequest, Generator, GeneratorError,
};
