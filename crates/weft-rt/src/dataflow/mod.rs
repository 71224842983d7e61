// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Dataflow variables: write-once cells with blocking and callback reads.

mod callback;
mod channel;
mod remote;
mod transform;
mod variable;
mod wait;

pub use callback::{Attached, DataCallback, MessageStream};
pub use channel::DataflowReadChannel;
pub use remote::{BindEvent, HostId, RemotePeer};
pub use transform::transform_all;
pub use variable::{DataflowVariable, VariableId};
