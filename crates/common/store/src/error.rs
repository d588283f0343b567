// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use snafu::Snafu;

/// Why a retrieval came back without a value.
///
/// Both kinds mean "no data"; they only differ in whether the caller waited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum TakeError {
    /// Immediate retrieval found nothing buffered under the key.
    #[snafu(display("No value buffered"))]
    NotFound,

    /// Bounded-wait retrieval saw nothing arrive before its deadline.
    #[snafu(display("No value arrived before the deadline"))]
    Expired,
}

pub type Result<T> = std::result::Result<T, TakeError>;
