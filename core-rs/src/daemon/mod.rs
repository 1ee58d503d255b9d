// Daemon Module - The coordinator service and its client-facing plumbing
//
// protocol    - wire types for requests and replies
// connections - live connections and reply routing
// dispatcher  - validation and queueing of requests
// worker      - state owned by the worker thread and the task bodies
// service     - CoordinatorService, which wires all of the above together

pub mod protocol;
pub mod connections;
pub mod dispatcher;
pub mod worker;
pub mod service;

pub use connections::{ClientConnection, ConnectionSet};
pub use dispatcher::RequestDispatcher;
pub use protocol::{CallbackId, ConnectionId, Operation, OperationKind, RawRequest, Reply, ReplyPayload};
pub use service::CoordinatorService;
pub use worker::{RegisteredDatabase, RequestTask, WorkerContext};
