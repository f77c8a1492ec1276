//! Language server handshake parameters

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Client capabilities announced in `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_document: Option<TextDocumentClientCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceClientCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notebook_document: Option<NotebookDocumentClientCapabilities>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synchronization: Option<SynchronizationCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hover: Option<HoverCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_diagnostics: Option<PublishDiagnosticsCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did_save: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_save: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_format: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishDiagnosticsCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_information: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_folders: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookDocumentClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synchronization: Option<Value>,
}

/// Subset of server capabilities the controller looks at
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_document_sync: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_provider: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hover_provider: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_provider: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_symbol_provider: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_lens_provider: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notebook_document_sync: Option<Value>,
}

/// Builds `initialize` parameters and reads the server's answer
pub struct CapabilityNegotiator;

impl CapabilityNegotiator {
    pub fn default_client_capabilities() -> ClientCapabilities {
        ClientCapabilities {
            text_document: Some(TextDocumentClientCapabilities {
                synchronization: Some(SynchronizationCapability {
                    did_save: Some(true),
                    will_save: Some(false),
                }),
                hover: Some(HoverCapability {
                    content_format: Some(vec!["markdown".to_string(), "plaintext".to_string()]),
                }),
                publish_diagnostics: Some(PublishDiagnosticsCapability {
                    related_information: Some(true),
                }),
            }),
            workspace: Some(WorkspaceClientCapabilities {
                workspace_folders: Some(true),
                configuration: Some(true),
            }),
            notebook_document: Some(NotebookDocumentClientCapabilities {
                synchronization: Some(json!({ "dynamicRegistration": false })),
            }),
        }
    }

    /// Parameters of the `initialize` request
    ///
    /// `initialization_options` carries the worker configuration so the
    /// server can build connections before the first document arrives.
    pub fn create_initialize_params(
        process_id: Option<u32>,
        root_uri: Option<String>,
        initialization_options: Value,
    ) -> Value {
        let mut params = json!({
            "processId": process_id,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": Self::default_client_capabilities(),
            "initializationOptions": initialization_options,
        });

        if let Some(root_uri) = root_uri {
            params["rootUri"] = json!(root_uri);
        }

        params
    }

    /// Read `capabilities` out of an `initialize` result
    pub fn parse_initialize_result(result: &Value) -> ServerCapabilities {
        result
            .get("capabilities")
            .cloned()
            .and_then(|caps| serde_json::from_value(caps).ok())
            .unwrap_or_default()
    }

    /// Names of the features the server advertised
    pub fn get_supported_capabilities(capabilities: &ServerCapabilities) -> Vec<String> {
        [
            ("completion", capabilities.completion_provider.is_some()),
            ("hover", capabilities.hover_provider.is_some()),
            ("definition", capabilities.definition_provider.is_some()),
            ("documentSymbol", capabilities.document_symbol_provider.is_some()),
            ("codeLens", capabilities.code_lens_provider.is_some()),
            ("notebookDocumentSync", capabilities.notebook_document_sync.is_some()),
        ]
        .into_iter()
        .filter(|(_, supported)| *supported)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_initialize_params() {
        let params = CapabilityNegotiator::create_initialize_params(
            Some(1234),
            Some("file:///path/to/project".to_string()),
            json!({"rowLimit": 50}),
        );

        assert_eq!(params["processId"], 1234);
        assert_eq!(params["rootUri"], "file:///path/to/project");
        assert_eq!(params["initializationOptions"]["rowLimit"], 50);
        assert!(params["capabilities"]["textDocument"]["synchronization"].is_object());
        assert_eq!(params["capabilities"]["workspace"]["configuration"], true);
    }

    #[test]
    fn test_no_root_uri() {
        let params = CapabilityNegotiator::create_initialize_params(None, None, Value::Null);
        assert!(params["processId"].is_null());
        assert!(params.get("rootUri").is_none());
    }

    #[test]
    fn test_parse_initialize_result() {
        let result = json!({
            "capabilities": {
                "textDocumentSync": 1,
                "hoverProvider": true,
                "codeLensProvider": {"resolveProvider": false}
            }
        });
        let caps = CapabilityNegotiator::parse_initialize_result(&result);
        assert_eq!(
            CapabilityNegotiator::get_supported_capabilities(&caps),
            vec!["hover".to_string(), "codeLens".to_string()]
        );

        let empty = CapabilityNegotiator::parse_initialize_result(&Value::Null);
        assert!(CapabilityNegotiator::get_supported_capabilities(&empty).is_empty());
    }
}
