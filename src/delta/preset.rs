use serde::{Deserialize, Serialize};

use crate::{preset::Preset, types::Guid, wrapper::WrappedStruct};

/// Full-value change of one catalog entry. `old == None` creates it, `new == None` deletes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetDelta {
    pub old: Option<Preset>,
    pub new: Option<Preset>,
}

impl WrappedStruct for PresetDelta {
    const TYPE_NAME: &'static str = "PresetDelta";
}

impl PresetDelta {
    pub fn guid(&self) -> Option<Guid> {
        self.new.as_ref().or(self.old.as_ref()).map(|p| p.guid)
    }

    pub fn is_empty(&self) -> bool {
        self.old == self.new
    }

    pub fn is_deletion(&self) -> bool {
        self.old.is_some() && self.new.is_none()
    }

    pub fn make_inverse(&self) -> Self {
        Self {
            old: self.new.clone(),
            new: self.old.clone(),
        }
    }
}
