// Copyright 2025 jonefeewang@gmail.com
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


use async_trait::async_trait;

use super::connection::{TransportReader, TransportWriter};
use super::packet::SessionKeys;
use crate::AppResult;

/// Negotiates session keys over a freshly opened transport, called once per connection
/// attempt before the connection counts as established.
#[async_trait]
pub trait KeyExchange: Send + Sync {
    async fn exchange(
        &self,
        reader: &mut dyn TransportReader,
        writer: &mut dyn TransportWriter,
    ) -> AppResult<SessionKeys>;
}

/// No negotiation, empty keys. For servers that speak the plain codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainKeyExchange;

#[async_trait]
impl KeyExchange for PlainKeyExchange {
    async fn exchange(
        &self,
        _reader: &mut dyn TransportReader,
        _writer: &mut dyn TransportWriter,
    ) -> AppResult<SessionKeys> {
        Ok(SessionKeys::default())
    }
}
