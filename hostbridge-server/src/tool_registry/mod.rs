// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Tool and Resource Registries
//!
//! Name-keyed catalogues of everything a client can invoke or read.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Tool Registry                      │
//! ├──────────────────────────────────────────────────────┤
//! │   register / unregister        lookup / list_all      │
//! │        (any thread)              (any thread)         │
//! │              │                        │               │
//! │              ▼                        ▼               │
//! │      ┌────────────────────────────────────────┐      │
//! │      │ DashMap<lowercase name,                │      │
//! │      │         Arc<ToolRegistration>>         │      │
//! │      └────────────────────────────────────────┘      │
//! │              │                                        │
//! │              ▼                                        │
//! │   broadcast::Sender<RegistryEvent>  (subscribers)     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Case-insensitive keys**: names are folded to lowercase for the map key
//!    while the registration keeps the name as written.
//!
//! 2. **Arc registrations**: lookups clone an `Arc` out of the shard, so no
//!    map lock is held while a handler runs.
//!
//! 3. **Per-registration statistics**: call counts and cumulative execution
//!    time live in atomics on the registration itself, so recording from the
//!    host thread never contends with lookups.

mod registry;
mod resources;

pub use registry::{
    RegistryEvent, RegistryStats, ToolDefinition, ToolRegistration, ToolRegistry,
    ToolRegistryError, ToolStats,
};
pub use resources::{ResourceRegistration, ResourceRegistry};
