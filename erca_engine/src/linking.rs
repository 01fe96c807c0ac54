use serde::{Deserialize, Serialize};

/// The two link-out volumes next to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LinkTarget {
    CitySilo,
    PelletCave,
}

impl LinkTarget {
    /// Responder state name for the link animation.
    pub fn state(self) -> &'static str {
        match self {
            LinkTarget::CitySilo => "CitySilo",
            LinkTarget::PelletCave => "PelletCave",
        }
    }

    /// Multistage behavior stage the avatar walks to before linking.
    pub fn stage(self) -> i32 {
        match self {
            LinkTarget::CitySilo => 1,
            LinkTarget::PelletCave => 2,
        }
    }

    /// Only the cave link needs an explicit transfer; the silo link book
    /// handles its own.
    pub fn requests_transfer(self) -> bool {
        matches!(self, LinkTarget::PelletCave)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkingRule {
    BasicLink,
}

/// Where the cave link goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaveLinkConfig {
    pub age_filename: String,
    pub age_instance_name: String,
    pub spawn_point: String,
    pub link_animation: String,
}

impl Default for CaveLinkConfig {
    fn default() -> Self {
        Self {
            age_filename: "PelletBahroCave".to_string(),
            age_instance_name: "PelletBahroCave".to_string(),
            spawn_point: "LinkInPointDefault".to_string(),
            link_animation: "TouchPellet".to_string(),
        }
    }
}

/// Area-transfer request handed to the linking manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRequest {
    pub age_filename: String,
    pub age_instance_name: String,
    pub age_instance_guid: Option<String>,
    pub spawn_point: String,
    pub rule: LinkingRule,
    pub link_animation: String,
}

impl LinkRequest {
    /// Builds the cave link. The instance GUID lives in the age's own data
    /// folder and may be missing on a fresh age.
    pub fn pellet_cave(config: &CaveLinkConfig, instance_guid: Option<&str>) -> Self {
        Self {
            age_filename: config.age_filename.clone(),
            age_instance_name: config.age_instance_name.clone(),
            age_instance_guid: instance_guid
                .filter(|guid| !guid.is_empty())
                .map(str::to_string),
            spawn_point: config.spawn_point.clone(),
            rule: LinkingRule::BasicLink,
            link_animation: config.link_animation.clone(),
        }
    }
}
