//! Remediation lookup for classified conditions.
//!
//! Purely informational: nothing here feeds back into capture or inference.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// What to do about a condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Remediation {
    pub name: String,
    pub urgency: Urgency,
    pub treatment: Vec<String>,
    pub prevention: Vec<String>,
}

/// Maps a class label to remediation advice.
pub trait KnowledgeBase: Send + Sync {
    /// Unknown labels get generic advice rather than nothing.
    fn lookup(&self, label: &str) -> Remediation;
}

/// Built-in table for the default chili leaf classes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinKnowledgeBase;

fn entry(name: &str, urgency: Urgency, treatment: &[&str], prevention: &[&str]) -> Remediation {
    Remediation {
        name: name.to_string(),
        urgency,
        treatment: treatment.iter().map(|s| s.to_string()).collect(),
        prevention: prevention.iter().map(|s| s.to_string()).collect(),
    }
}

impl KnowledgeBase for BuiltinKnowledgeBase {
    fn lookup(&self, label: &str) -> Remediation {
        match label {
            "leaf_curl" => entry(
                "Leaf Curl",
                Urgency::Medium,
                &[
                    "Control aphid and thrips vectors with insecticide",
                    "Apply micronutrient fertilizer (Zn, B, Mo)",
                    "Prune severely infected leaves",
                ],
                &[
                    "Plant virus-resistant varieties",
                    "Rotate crops",
                    "Keep NPK fertilization balanced",
                ],
            ),
            "leaf_spot" => entry(
                "Leaf Spot",
                Urgency::High,
                &[
                    "Apply mancozeb or chlorothalonil fungicide",
                    "Improve drainage and air circulation",
                    "Prune infected leaves",
                ],
                &[
                    "Avoid wetting foliage when watering",
                    "Use organic mulch",
                    "Sanitize beds regularly",
                ],
            ),
            "whitefly" => entry(
                "Whitefly",
                Urgency::High,
                &[
                    "Apply systemic insecticide (imidacloprid)",
                    "Hang yellow sticky traps",
                    "Release natural predators (Encarsia formosa)",
                ],
                &["Monitor with yellow traps", "Remove surrounding weeds", "Use reflective mulch"],
            ),
            "yellowish" => entry(
                "Yellowing",
                Urgency::Medium,
                &[
                    "Apply nitrogen fertilizer",
                    "Improve soil drainage",
                    "Keep soil pH between 6.0 and 6.8",
                ],
                &[
                    "Fertilize with balanced NPK",
                    "Add compost to the soil",
                    "Water on a fixed schedule",
                ],
            ),
            "healthy" => entry(
                "Healthy",
                Urgency::Low,
                &[],
                &["Keep regular fertilizing and watering", "Monitor for pests weekly"],
            ),
            _ => entry(
                "Unknown Condition",
                Urgency::Medium,
                &[
                    "Consult an agronomist",
                    "Isolate affected plants",
                    "Observe symptoms in more detail",
                ],
                &["Sanitize beds", "Monitor regularly"],
            ),
        }
    }
}
