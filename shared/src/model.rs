use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HiveId(pub String);

impl HiveId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    pub fn now() -> Self {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Species {
    pub id: u32,
    pub common_name: String,
    pub scientific_name: String,
}

impl Species {
    pub fn new(id: u32, common_name: impl Into<String>, scientific_name: impl Into<String>) -> Self {
        Self {
            id,
            common_name: common_name.into(),
            scientific_name: scientific_name.into(),
        }
    }

    /// Looks a species up in the built-in catalogue.
    pub fn from_catalogue(id: u32) -> Option<Self> {
        SPECIES_CATALOGUE
            .iter()
            .find(|(catalogue_id, _, _)| *catalogue_id == id)
            .map(|(id, common, scientific)| Self::new(*id, *common, *scientific))
    }
}

/// Stingless bee species known to the app, as `(id, common name, scientific name)`.
pub const SPECIES_CATALOGUE: &[(u32, &str, &str)] = &[
    (1, "Jataí", "Tetragosnisca angustula"),
    (2, "Mirim emerina", "Plebeia emerina"),
    (3, "Mirim", "Plebeia gigantea"),
    (4, "Mandaçaia", "Melipona quadrifasciata"),
    (5, "Guaraipo", "Melipona bicolor"),
    (6, "Manduri", "Melipona marginata"),
    (7, "Manduri", "Melipona torrida"),
    (8, "Tubuna", "Scaptotrigona bipunctata"),
    (9, "Canudo", "Scaptotrigona depilis"),
    (10, "Mirim mosquito", "Plebeia droryana"),
];

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HiveStatus {
    ProntaParaColheita,
    Induzida,
    EmDesenvolvimento,
    ProntoParaMelgueira,
    GarrafaPet,
    Vazia,
    Movida,
    #[default]
    #[serde(other)]
    Desconhecido,
}

impl HiveStatus {
    pub const ALL: [HiveStatus; 8] = [
        HiveStatus::ProntaParaColheita,
        HiveStatus::Induzida,
        HiveStatus::EmDesenvolvimento,
        HiveStatus::ProntoParaMelgueira,
        HiveStatus::GarrafaPet,
        HiveStatus::Vazia,
        HiveStatus::Movida,
        HiveStatus::Desconhecido,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProntaParaColheita => "PRONTA_PARA_COLHEITA",
            Self::Induzida => "INDUZIDA",
            Self::EmDesenvolvimento => "EM_DESENVOLVIMENTO",
            Self::ProntoParaMelgueira => "PRONTO_PARA_MELGUEIRA",
            Self::GarrafaPet => "GARRAFA_PET",
            Self::Vazia => "VAZIA",
            Self::Movida => "MOVIDA",
            Self::Desconhecido => "DESCONHECIDO",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::ProntaParaColheita => "Pronta para Colheita",
            Self::Induzida => "Induzida",
            Self::EmDesenvolvimento => "Em Desenvolvimento",
            Self::ProntoParaMelgueira => "Pronto para Melgueira",
            Self::GarrafaPet => "Garrafa Pet",
            Self::Vazia => "Vazia",
            Self::Movida => "Movida",
            Self::Desconhecido => "Desconhecido",
        }
    }

    /// Unrecognised values collapse to `Desconhecido`, mirroring the serde fallback.
    pub fn parse(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .unwrap_or(Self::Desconhecido)
    }
}

impl fmt::Display for HiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed colony, in the shape the rest of the app works with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hive {
    pub id: HiveId,
    pub code: Option<u32>,
    pub species: Species,
    pub starting_date: Option<String>,
    pub status: HiveStatus,
    pub meliponary_id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateHivePayload {
    pub code: Option<u32>,
    pub species: Species,
    pub status: HiveStatus,
}

/// Partial update; `None` fields are left untouched remotely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateHivePayload {
    pub code: Option<u32>,
    pub species: Option<Species>,
    pub status: Option<HiveStatus>,
    pub starting_date: Option<String>,
}

impl UpdateHivePayload {
    pub fn is_empty(&self) -> bool {
        self.code.is_none()
            && self.species.is_none()
            && self.status.is_none()
            && self.starting_date.is_none()
    }
}

/// Case-insensitive search over code, species names and status.
pub fn filter_hives<'a>(hives: &'a [Hive], term: &str) -> Vec<&'a Hive> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return hives.iter().collect();
    }

    hives
        .iter()
        .filter(|hive| {
            hive.code.is_some_and(|code| code.to_string().contains(&term))
                || hive.species.common_name.to_lowercase().contains(&term)
                || hive.species.scientific_name.to_lowercase().contains(&term)
                || hive.status.as_str().to_lowercase().contains(&term)
        })
        .collect()
}

pub fn count_by_status(hives: &[Hive], status: HiveStatus) -> usize {
    hives.iter().filter(|h| h.status == status).count()
}
