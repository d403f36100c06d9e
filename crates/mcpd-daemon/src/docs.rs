//! Self-hosted API documentation: an OpenAPI 3 document plus a small
//! HTML page that renders it.

use serde_json::{Value, json};

pub const DOCS_HTML: &str = r#"<!doctype html>
<html>
<head>
  <title>mcpd API</title>
  <meta charset="utf-8"/>
  <meta name="viewport" content="width=device-width, initial-scale=1"/>
</head>
<body>
  <div id="docs"></div>
  <script type="module">
    import { ApiReference } from 'https://cdn.jsdelivr.net/npm/@scalar/api-reference';
    ApiReference({ url: '/openapi.json', el: document.getElementById('docs') });
  </script>
  <noscript><p>See <a href="/openapi.json">openapi.json</a>.</p></noscript>
</body>
</html>
"#;

pub fn openapi_document() -> Value {
    let error_response = json!({
        "description": "Structured error",
        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Error"}}},
    });

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "mcpd",
            "description": "Aggregated HTTP surface over a fleet of MCP servers.",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": {
            "/api/v1/servers": {
                "get": {
                    "summary": "List managed servers with state and health",
                    "responses": {"200": {"description": "Server list"}},
                }
            },
            "/api/v1/servers/{name}": {
                "get": {
                    "summary": "One server's metadata and health",
                    "parameters": [{"$ref": "#/components/parameters/server"}],
                    "responses": {
                        "200": {"description": "Server view"},
                        "404": error_response.clone(),
                    },
                }
            },
            "/api/v1/servers/{name}/tools": {
                "get": {
                    "summary": "Effective tools of one server",
                    "parameters": [{"$ref": "#/components/parameters/server"}],
                    "responses": {
                        "200": {"description": "Tool list"},
                        "404": error_response.clone(),
                    },
                }
            },
            "/api/v1/servers/{name}/tools/{tool}": {
                "post": {
                    "summary": "Invoke a tool",
                    "parameters": [
                        {"$ref": "#/components/parameters/server"},
                        {"$ref": "#/components/parameters/tool"},
                    ],
                    "requestBody": {
                        "content": {
                            "application/json": {
                                "schema": {"type": "object", "description": "Tool arguments"}
                            }
                        }
                    },
                    "responses": {
                        "200": {"description": "MCP tool result"},
                        "404": error_response.clone(),
                        "503": error_response.clone(),
                        "504": error_response.clone(),
                    },
                }
            },
            "/api/v1/tools": {
                "get": {
                    "summary": "Flat (server, tool) list across ready servers",
                    "responses": {"200": {"description": "Tool list"}},
                }
            },
            "/api/v1/health": {
                "get": {
                    "summary": "Overall daemon health",
                    "responses": {"200": {"description": "ok or degraded, with per-server detail"}},
                }
            },
        },
        "components": {
            "parameters": {
                "server": {
                    "name": "name",
                    "in": "path",
                    "required": true,
                    "schema": {"type": "string"},
                },
                "tool": {
                    "name": "tool",
                    "in": "path",
                    "required": true,
                    "schema": {"type": "string"},
                },
            },
            "schemas": {
                "Error": {
                    "type": "object",
                    "required": ["error", "kind"],
                    "properties": {
                        "error": {"type": "string"},
                        "kind": {
                            "type": "string",
                            "enum": [
                                "config_invalid",
                                "spec_unsatisfied",
                                "spawn_failed",
                                "unavailable",
                                "not_found",
                                "timeout",
                                "transport",
                                "protocol_error",
                                "cancelled",
                                "internal",
                            ],
                        },
                        "details": {},
                    },
                }
            },
        },
    })
}
