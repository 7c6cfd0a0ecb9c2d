/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use tokio::task::AbortHandle;

/// Handle to a delayed publish. Cancelling, or dropping the handle, prevents
/// the event from being published if it has not fired yet.
#[derive(Debug)]
pub struct TimerHandle {
    handle: AbortHandle,
}

impl TimerHandle {
    pub(crate) fn new(handle: AbortHandle) -> Self {
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// True once the event was published or the timer was cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
