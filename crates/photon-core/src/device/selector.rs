// Copyright 2025 eraflo
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

use super::info::{DeviceInfo, DeviceTypeMask};
use async_trait::async_trait;

/// Discovers compute adapters exposed by a graphics or compute API.
///
/// Adapter enumeration can block on driver I/O, so listing is asynchronous. A
/// concrete implementation lives in `photon-infra` and wraps `wgpu`.
#[async_trait]
pub trait ComputeAdapterSelector {
    /// The error type returned if enumeration fails.
    type Error: std::fmt::Debug + std::fmt::Display + Send + Sync + 'static;

    /// Lists the adapters whose device type is in `mask`.
    ///
    /// # Arguments
    ///
    /// * `mask`: Backends the caller is interested in.
    ///
    /// # Returns
    ///
    /// One [`DeviceInfo`] per usable adapter, in enumeration order.
    async fn list_adapters(&self, mask: DeviceTypeMask) -> Result<Vec<DeviceInfo>, Self::Error>;

    /// Synchronously checks whether any backend in `mask` can exist on this platform.
    fn is_backend_supported(&self, mask: DeviceTypeMask) -> bool;
}
