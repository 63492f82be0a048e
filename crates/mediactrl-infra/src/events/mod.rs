/*!
Event bus

A much smaller relative of `infra-common::events::bus::EventBus`: this
stack has one process, one address space, and a modest number of
publishers/subscribers (one per Client, Dialog or Conference), so the
zero-copy/sharded-registry machinery the teacher built for a
many-tenant event mesh is overkill. What's kept is the shape: a typed,
cloneable event bus with bounded broadcast capacity and basic delivery
metrics, used to carry control-package callbacks (events) up to whichever
CFW transaction owns the originating Client without the package crate
depending on the CFW crate directly.
*/

mod bus;

pub use bus::{EventBus, EventBusConfig};
