// Batch refinement
//
// A refiner takes one batch of pairs plus the current glossary and returns
// the corrected batch, optionally with newly learned terms:
// - command: runs an external program per batch
// - http: calls an OpenAI-compatible chat completions API
// - response: cleaning and parsing of raw refiner output

pub mod command;
pub mod http;
pub mod response;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{RefinerBackend, RefinerConfig};
use crate::error::{Result, RefineError};
use crate::format::PairFormat;
use crate::glossary::{Glossary, GlossaryEntry, Tier};
use crate::pairs::SubtitlePair;

pub use command::{CommandRefiner, RefinerCommand};
pub use http::HttpRefiner;

/// Output of one refined batch
#[derive(Debug, Clone, Default)]
pub struct Refinement {
    /// Corrected pairs; may be reordered or incomplete
    pub pairs: Vec<SubtitlePair>,
    /// Terms the refiner learned from this batch
    pub terms: Vec<GlossaryEntry>,
}

/// Main trait for batch refinement
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Refiner: Send + Sync {
    /// Refine one batch against the current glossary
    async fn refine_batch(&self, batch: &[SubtitlePair], glossary: &Glossary) -> Result<Refinement>;
}

/// Request document handed to a refiner program
#[derive(Debug, Serialize)]
pub struct RefineRequest<'a> {
    pub format: PairFormat,
    /// The batch serialized in `format`
    pub pairs: String,
    pub glossary: Vec<RequestTerm<'a>>,
}

#[derive(Debug, Serialize)]
pub struct RequestTerm<'a> {
    #[serde(flatten)]
    pub entry: &'a GlossaryEntry,
    pub tier: Tier,
}

impl<'a> RefineRequest<'a> {
    pub fn new(format: PairFormat, batch: &[SubtitlePair], glossary: &'a Glossary) -> Result<Self> {
        Ok(Self {
            format,
            pairs: format.serialize(batch)?,
            glossary: glossary
                .iter()
                .map(|(tier, entry)| RequestTerm { entry, tier })
                .collect(),
        })
    }
}

/// Factory for creating refiner instances
pub struct RefinerFactory;

impl RefinerFactory {
    pub fn create_refiner(config: &RefinerConfig) -> Result<Box<dyn Refiner>> {
        match config.backend {
            RefinerBackend::Command => {
                if config.command.trim().is_empty() {
                    return Err(RefineError::Config(
                        "No refiner command configured; set [refiner].command in config.toml"
                            .to_string(),
                    ));
                }
                Ok(Box::new(CommandRefiner::new(config.clone())))
            }
            RefinerBackend::Http => {
                if config.endpoint.trim().is_empty() || config.model.trim().is_empty() {
                    return Err(RefineError::Config(
                        "The http refiner needs [refiner].endpoint and [refiner].model".to_string(),
                    ));
                }
                Ok(Box::new(HttpRefiner::new(config.clone())?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_lists_both_tiers() {
        let mut glossary = Glossary::with_authoritative(vec![GlossaryEntry::new("JAG", "军法署")]);
        glossary.learn(vec![GlossaryEntry::new("Harm", "哈姆").with_confidence(0.8)]);
        let batch = vec![SubtitlePair::new(4, "Harm?", "哈姆？")];

        let request = RefineRequest::new(PairFormat::XmlPair, &batch, &glossary).unwrap();
        let json: serde_json::Value = serde_json::to_value(&request).unwrap();

        assert_eq!(json["format"], "xml-pair");
        assert_eq!(json["pairs"], "<pair>\nID=4\neng=Harm?\nchinese=哈姆？\n</pair>");
        assert_eq!(json["glossary"][0]["eng"], "JAG");
        assert_eq!(json["glossary"][0]["tier"], "authoritative");
        assert_eq!(json["glossary"][1]["zh"], "哈姆");
        assert_eq!(json["glossary"][1]["tier"], "learned");
        assert_eq!(json["glossary"][1]["confidence"], 0.8);
    }

    #[test]
    fn test_factory_requires_command() {
        assert!(matches!(
            RefinerFactory::create_refiner(&RefinerConfig::default()),
            Err(RefineError::Config(_))
        ));

        let config = RefinerConfig {
            command: "refine-batch".to_string(),
            ..RefinerConfig::default()
        };
        assert!(RefinerFactory::create_refiner(&config).is_ok());
    }

    #[test]
    fn test_factory_http_backend_requires_model() {
        let mut config = RefinerConfig {
            backend: RefinerBackend::Http,
            ..RefinerConfig::default()
        };
        assert!(matches!(
            RefinerFactory::create_refiner(&config),
            Err(RefineError::Config(_))
        ));

        config.model = "gpt-4o-mini".to_string();
        assert!(RefinerFactory::create_refiner(&config).is_ok());
    }
}
