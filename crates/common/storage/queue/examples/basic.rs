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

//! Producer/consumer walkthrough.
//!
//! This example shows:
//! - Opening a registry and fetching a queue by name
//! - Staging records under the lock and merging them on unlock
//! - A second handle being refused while the lock is held
//! - Draining the queue in batches

use queue::{QueueBuilder, Result};
use serde_json::json;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let base = std::env::temp_dir().join(format!("lineq-example-{}", std::process::id()));
    if let Err(e) = std::fs::create_dir_all(&base) {
        tracing::error!(path = ?base, error = %e, "Cannot create example directory");
        return Ok(());
    }

    let mut registry = QueueBuilder::new(&base).build_registry()?;

    // Producer
    {
        let orders = registry.get("orders")?;
        if orders.lock()? {
            orders.add_item("1001", "rye bread")?;
            orders.add_item("1002", "yellow mustard")?;
            orders.add_json("1003", &json!({ "item": "dill pickles", "qty": 3 }))?;
            orders.unlock()?;
        }
        tracing::info!(count = orders.item_count()?, "Orders queued");
    }

    // Another process would see the lock and back off.
    let mut other = QueueBuilder::new(&base).build("orders")?;
    {
        let orders = registry.get("orders")?;
        orders.lock_with_ttl(30)?;
        tracing::info!(acquired = other.lock()?, "Second handle tried the lock");
        orders.unlock()?;
    }
    drop(other);

    // Consumer
    let orders = registry.get("orders")?;
    if orders.lock()? {
        while let Some(batch) = orders.drain_oldest(2)? {
            for item in batch {
                tracing::info!(key = %item.key, value = %item.value, "Drained");
            }
        }
        orders.unlock()?;
    }

    drop(registry);
    let _ = std::fs::remove_dir_all(&base);
    Ok(())
}
