//! Soil-treatment chemicals that can be compared side by side in a proposal.

pub const EXPOSE_SOIL: &str = "Expose Soil Treatent per Liter Larutan";
pub const PREMISE_SOIL: &str = "Premise Soil Treatent per Liter Larutan";
pub const AGENDA_SOIL: &str = "Agenda Soil Treatent per Liter Larutan";

/// Material names (as sent by the calculator) of the comparable chemicals.
pub const COMPARABLE_CHEMICALS: [&str; 3] = [EXPOSE_SOIL, PREMISE_SOIL, AGENDA_SOIL];

pub fn is_comparable(material: &str) -> bool {
    COMPARABLE_CHEMICALS.contains(&material)
}

/// Marketing copy printed for a chemical in the comparison block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChemicalProfile {
    pub material: &'static str,
    pub name: &'static str,
    pub descriptions: [&'static str; 3],
    /// File name under the chemical images directory.
    pub image: &'static str,
    pub treatment_name: &'static str,
}

const PROFILES: [ChemicalProfile; 3] = [
    ChemicalProfile {
        material: EXPOSE_SOIL,
        name: "Expose 55 SC",
        descriptions: [
            "Bahan aktif Fipronil yang bersifat racun perut dan racun kontak.",
            "Dosis 5-10 ml/L",
            "Konsentrasi 5,5 %",
        ],
        image: "expose.png",
        treatment_name: "Pipanisasi & Spraying Chemical Expose by KRISTAL",
    },
    ChemicalProfile {
        material: AGENDA_SOIL,
        name: "Agenda 25 EC",
        descriptions: [
            "Bahan aktif Fipronil",
            "Efektif membasmi rayap hingga ke ratunya (Koloni Eliminasi)",
            "Dosis 10 ml/L",
        ],
        image: "agenda.png",
        treatment_name: "Pipanisasi & Spraying Chemical Agenda by Envu Indonesia",
    },
    ChemicalProfile {
        material: PREMISE_SOIL,
        name: "Premise 200 SL",
        descriptions: ["Bahan aktif Imidakloprid", "Non-repellent...", "Dosis 2.5 ml/L"],
        image: "premise.png",
        treatment_name: "Pipanisasi & Spraying Chemical Premise by Envu Indonesia",
    },
];

pub fn profile(material: &str) -> Option<&'static ChemicalProfile> {
    PROFILES.iter().find(|p| p.material == material)
}
