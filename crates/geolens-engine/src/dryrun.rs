use geolens_contracts::error::{ContractError, ContractResult};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::transport::{Capability, RawCitation, RawReply, Transport, TransportRequest};

/// Offline transport returning canned, schema-conforming replies.
pub struct DryrunTransport;

struct Specimen {
    name: &'static str,
    category: &'static str,
    chemical_formula: &'static str,
    hardness: &'static str,
    description: &'static str,
    geological_context: &'static str,
    rarity: &'static str,
    fun_fact: &'static str,
}

const SPECIMENS: &[Specimen] = &[
    Specimen {
        name: "Quartz",
        category: "Mineral (tectosilicate)",
        chemical_formula: "SiO2",
        hardness: "7",
        description: "Colourless to milky hexagonal prisms with vitreous lustre and conchoidal fracture.",
        geological_context: "Crystallises in granitic magmas, pegmatites and hydrothermal veins.",
        rarity: "Very common",
        fun_fact: "Quartz is piezoelectric, which is why it keeps time in watches.",
    },
    Specimen {
        name: "Basalt",
        category: "Igneous (extrusive)",
        chemical_formula: "Plagioclase + pyroxene ± olivine",
        hardness: "6",
        description: "Dark grey, fine-grained rock, often vesicular.",
        geological_context: "Forms from rapidly cooled low-silica lava at ridges and hotspots.",
        rarity: "Very common",
        fun_fact: "Most of the ocean floor is basalt.",
    },
    Specimen {
        name: "Malachite",
        category: "Mineral (carbonate)",
        chemical_formula: "Cu2CO3(OH)2",
        hardness: "3.5-4",
        description: "Banded bright green botryoidal masses with silky lustre.",
        geological_context: "Secondary mineral in the oxidised zones of copper deposits.",
        rarity: "Uncommon",
        fun_fact: "Ground malachite was used as a green pigment for millennia.",
    },
];

impl DryrunTransport {
    fn pick_specimen(bytes: &[u8]) -> &'static Specimen {
        let digest = Sha256::digest(bytes);
        &SPECIMENS[digest[0] as usize % SPECIMENS.len()]
    }

    fn first_line(text: &str) -> &str {
        text.lines().next().unwrap_or_default().trim()
    }
}

impl Transport for DryrunTransport {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn call(&self, request: &TransportRequest) -> ContractResult<RawReply> {
        let mut reply = RawReply {
            model: request.model.clone(),
            finish_reason: Some("STOP".to_string()),
            ..RawReply::default()
        };
        match request.capability {
            Capability::Structured => {
                let Some(image) = request.image.as_ref() else {
                    return Err(ContractError::transport("structured request carries no image"));
                };
                let specimen = Self::pick_specimen(&image.bytes);
                reply.text = json!({
                    "name": specimen.name,
                    "category": specimen.category,
                    "chemicalFormula": specimen.chemical_formula,
                    "hardness": specimen.hardness,
                    "description": specimen.description,
                    "geologicalContext": specimen.geological_context,
                    "rarity": specimen.rarity,
                    "funFact": specimen.fun_fact,
                })
                .to_string();
            }
            Capability::Grounded => {
                reply.text = format!(
                    "Offline insight, no web search was performed. Query: {}",
                    Self::first_line(&request.prompt)
                );
                reply.citations = vec![
                    RawCitation {
                        title: Some("Mindat mineral database".to_string()),
                        uri: Some("https://www.mindat.org/".to_string()),
                    },
                    RawCitation {
                        title: Some("Unlinked field note".to_string()),
                        uri: None,
                    },
                ];
            }
            Capability::Conversational => {
                reply.text = format!(
                    "Offline geologist (turn {}): {}",
                    request.history.len() / 2 + 1,
                    request.prompt.trim()
                );
            }
        }
        Ok(reply)
    }
}
