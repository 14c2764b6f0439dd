//! Common imports for callers wiring up an endpoint end-to-end.

pub use crate::address::{Address, AddressFormat};
pub use crate::av::{AddressVector, AvHandle, AvType};
pub use crate::backend::{AtomicDatatype, AtomicOp, FabricBackend};
pub use crate::context::{
    CallbackReceiver, CompletionFuture, CoroutineOutcome, CoroutineReceiver, Executor,
    ExecutorCancelToken, ExecutorReceiver, ReceiverDyn, SubmissionContext,
};
#[cfg(feature = "runtime-tokio")]
pub use crate::context::PromiseReceiver;
pub use crate::endpoint::{BindDirection, CancelHandle, Counter, Endpoint};
pub use crate::error::{Error, ErrorKind, Result, VoidResult};
pub use crate::fabric::{CapabilityQuery, Domain, EndpointType, Fabric, FabricInfo, Hints, query_fabric};
pub use crate::memory::{
    BufferRegistration, CachedMr, DeviceInterface, DeviceMemory, MemoryRegion, MrCache,
    RegisteredBuffer, RegistrationFlavor, RemoteDescriptor,
};
pub use crate::primitives::{
    AccessFlags, Capabilities, CompletionFlags, FabricAddr, FabricVersion, MrKey, ProgressMode,
    QueueSize, RemoteAddr, Tag, ThreadingMode,
};
pub use crate::provider::{Cxi, Efa, ProviderTag, ProviderTraits, Shm, Tcp, Verbs};
pub use crate::queue::{CompletionEvent, CompletionQueue, ControlEvent, EventQueue, QueueAttr};
pub use crate::reactor::{Reactor, ReactorOptions};
pub use crate::testing::MockBackend;
pub use crate::triggered::{DeferredWork, OpDescriptor, ThresholdCondition, TriggeredQueue};

#[cfg(feature = "runtime-tokio")]
pub use crate::context::TokioExecutor;
