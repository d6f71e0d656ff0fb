// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # classweave
//!
//! A bytecode instrumentation weaving engine. `classweave` decides which
//! methods user-authored code fragments ("snippets") apply to, analyzes
//! method bodies well enough to reason about basic blocks, dominance and
//! exception handler semantics, turns raw fragment bodies into validated,
//! composable code, and resolves the auxiliary values - static analysis
//! results, guard decisions, per-argument processor instances - needed to
//! compose multiple fragments at one instrumentation point, all without
//! altering the target method's observable behavior.
//!
//! ## Features
//!
//! - **Scope matching** - a compact textual pattern language selecting
//!   eligible methods by return type, class, method name and parameters
//! - **Control flow analysis** - arena-based basic block graphs with lazy
//!   connectivity, join detection for exception handlers, and dominator-based
//!   loop detection
//! - **Fragment processing** - validation of static context invocations,
//!   special-variable collection, return normalization and thread-local
//!   access rewriting
//! - **Explicit registries** - static contexts, guards and argument
//!   processors are registered at configuration time; no runtime discovery
//! - **Session isolation** - every cache lives in the session, so concurrent
//!   weaving of independent compiled units needs no global state
//!
//! ## Quick Start
//!
//! ```rust
//! use classweave::prelude::*;
//!
//! // Declare a snippet applying to all `main` methods.
//! let body = MethodBodyBuilder::new("my/Inst", "before", "()V")
//!     .op(Insn::Other { mnemonic: "nop" })
//!     .op(Insn::Return(ReturnKind::Void))
//!     .build();
//!
//! let session = SessionBuilder::new()
//!     .snippet(SnippetSpec {
//!         origin_class: "my/Inst".to_string(),
//!         origin_method: "before".to_string(),
//!         scope: "*.main".to_string(),
//!         order: 0,
//!         guard: None,
//!         body,
//!         processor_invocations: Vec::new(),
//!     })
//!     .build()?;
//!
//! let eligible = session.matching_snippets("my/pkg/App", "main", "([Ljava/lang/String;)V")?;
//! assert_eq!(eligible.len(), 1);
//! # Ok::<(), classweave::Error>(())
//! ```
//!
//! ## Error Tiers
//!
//! Checked failures - malformed scope expressions, invalid static context
//! invocations, guard validation failures, structurally impossible processor
//! applications - are [`Error`] values surfaced during configuration, before
//! any weaving of the affected compiled unit. Unchecked failures - user
//! guard or context code blowing up, internal invariant violations - are
//! panics and abort the whole request; the hosting environment isolates
//! requests per compiled unit.
//!
//! ## Out of Scope
//!
//! Instruction encoding/decoding (a reader/writer for the binary format is
//! assumed), discovery of instrumentation classes, the marker producing
//! shadows, verification of rewritten methods, and the final instruction
//! splicing performed by the weaver.

pub mod analysis;
pub mod argproc;
pub mod context;
pub mod fragment;
pub mod guard;
pub mod method;
pub mod prelude;
pub mod scope;
pub mod session;
pub mod snippet;
pub mod vars;

mod error;
mod shadow;

pub use error::Error;
pub use shadow::{Shadow, ShadowId};

/// Convenience alias for operations returning a [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;
