use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use marquee_core::{RoomLayout, ScreeningDirectory, StoreError};

/// In-process screening directory populated from config seeds at startup.
#[derive(Default)]
pub struct StaticDirectory {
    layouts: RwLock<HashMap<Uuid, RoomLayout>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, screening_id: Uuid, layout: RoomLayout) {
        let mut layouts = self.layouts.write().unwrap();
        layouts.insert(screening_id, layout);
    }
}

#[async_trait]
impl ScreeningDirectory for StaticDirectory {
    async fn room_layout(&self, screening_id: Uuid) -> Result<Option<RoomLayout>, StoreError> {
        let layouts = self.layouts.read().unwrap();
        Ok(layouts.get(&screening_id).cloned())
    }
}
