/*!
 * Runtime Module
 * The object/thread model the engine operates on, the rendezvous boundary,
 * and the subsystem facade
 */

pub mod handshake;
pub mod object;
#[allow(clippy::module_inception)]
pub mod runtime;
pub mod sampler;
pub mod thread;

pub use handshake::{HandshakeExecutor, ThreadListHandshake};
pub use object::{Obj, RuntimeObject};
pub use runtime::MonitorRuntime;
pub use sampler::CodeGroupingSampler;
pub use thread::{OmCache, RuntimeThread, ThreadRegistry};
