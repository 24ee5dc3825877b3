// Copyright 2024 The dualrpc Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The callback proxy (§4.4): turns a remote callback pointer into a
//! locally-callable function and back, so function pointers can cross the
//! RPC boundary despite the two sides not sharing an address space.

mod in_table;
mod out_table;

pub use in_table::InTable;
pub use out_table::{OutHandler, OutTable};
