//! Proposal type operations
//!
//! Labels, descriptions and structural checks for proposed changes.

use crate::proposal::ProposalType;
use std::collections::HashSet;

impl ProposalType {
    /// Stable label used in summaries and audit entries
    pub fn kind(&self) -> &'static str {
        match self {
            ProposalType::EmbedDocument { .. } => "embed_document",
            ProposalType::BatchEmbed { .. } => "batch_embed",
            ProposalType::AddAdmin { .. } => "add_admin",
            ProposalType::RemoveAdmin { .. } => "remove_admin",
            ProposalType::ChangeThreshold { .. } => "change_threshold",
            ProposalType::UpdateQuorum { .. } => "update_quorum",
            ProposalType::TransferGenesis { .. } => "transfer_genesis",
        }
    }

    /// Get a human-readable description of the change
    pub fn description(&self) -> String {
        match self {
            ProposalType::EmbedDocument { documents } => {
                format!("Embed {} new document(s)", documents.len())
            }
            ProposalType::BatchEmbed { document_ids } => {
                format!("Embed {} staged document(s)", document_ids.len())
            }
            ProposalType::AddAdmin { principal } => format!("Add admin {}", principal),
            ProposalType::RemoveAdmin { principal } => format!("Remove admin {}", principal),
            ProposalType::ChangeThreshold { value } => {
                format!("Change approval threshold to {}", value)
            }
            ProposalType::UpdateQuorum { value } => format!("Change quorum to {}%", value),
            ProposalType::TransferGenesis { new_owner } => {
                format!("Transfer ownership to {}", new_owner)
            }
        }
    }

    /// Structural checks that need no collection state. Numeric bounds are
    /// checked against the collection when the proposal executes.
    pub fn check_shape(&self, max_documents: usize) -> Result<(), String> {
        match self {
            ProposalType::EmbedDocument { documents } => {
                if documents.is_empty() {
                    return Err("At least one document is required".to_string());
                }
                if documents.len() > max_documents {
                    return Err(format!(
                        "At most {} documents per proposal",
                        max_documents
                    ));
                }
                if let Some(doc) = documents
                    .iter()
                    .find(|d| d.title.trim().is_empty() || d.content.trim().is_empty())
                {
                    return Err(format!(
                        "Document '{}' needs both a title and content",
                        doc.title
                    ));
                }
                Ok(())
            }
            ProposalType::BatchEmbed { document_ids } => {
                if document_ids.is_empty() {
                    return Err("At least one document id is required".to_string());
                }
                if document_ids.len() > max_documents {
                    return Err(format!(
                        "At most {} documents per proposal",
                        max_documents
                    ));
                }
                let mut seen = HashSet::new();
                for id in document_ids {
                    if id.trim().is_empty() {
                        return Err("Document ids must not be empty".to_string());
                    }
                    if !seen.insert(id.as_str()) {
                        return Err(format!("Document id '{}' is listed twice", id));
                    }
                }
                Ok(())
            }
            ProposalType::ChangeThreshold { value } | ProposalType::UpdateQuorum { value }
                if *value == 0 =>
            {
                Err("Value must be positive".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::NewDocument;

    #[test]
    fn test_batch_embed_shape() {
        let ok = ProposalType::BatchEmbed {
            document_ids: vec!["a".into(), "b".into()],
        };
        assert!(ok.check_shape(10).is_ok());

        let dup = ProposalType::BatchEmbed {
            document_ids: vec!["a".into(), "a".into()],
        };
        assert!(dup.check_shape(10).is_err());

        let empty = ProposalType::BatchEmbed { document_ids: vec![] };
        assert!(empty.check_shape(10).is_err());

        assert!(ok.check_shape(1).is_err());
    }

    #[test]
    fn test_embed_document_requires_content() {
        let blank = ProposalType::EmbedDocument {
            documents: vec![NewDocument::new("Title", "   ")],
        };
        assert!(blank.check_shape(10).is_err());

        let fine = ProposalType::EmbedDocument {
            documents: vec![NewDocument::new("Title", "Body")],
        };
        assert!(fine.check_shape(10).is_ok());
        assert_eq!(fine.kind(), "embed_document");
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert!(ProposalType::ChangeThreshold { value: 0 }.check_shape(10).is_err());
        assert!(ProposalType::UpdateQuorum { value: 51 }.check_shape(10).is_ok());
    }
}
