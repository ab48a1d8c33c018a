/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Fixed payloads sent to the language server.
//!
//! The settings object answers the server's `workspace/configuration`
//! requests and rides along on `workspace/didChangeConfiguration`.
//! Editors and intelephense builds in the field expect these exact keys,
//! so the object is kept as one literal rather than assembled from
//! configuration.

use serde_json::{Value, json};

/// The bridge's settings object, as intelephense expects to receive it.
#[must_use]
pub fn configuration() -> Value {
    json!({
        "intelephense": {
            "files": {
                "maxSize": 3_000_000,
                "associations": ["*.php", "*.phtml"],
                "exclude": [
                    "**/.git/**",
                    "**/.svn/**",
                    "**/.hg/**",
                    "**/CVS/**",
                    "**/.DS_Store/**",
                    "**/node_modules/**",
                    "**/bower_components/**",
                    "**/vendor/**/{Tests,tests}/**",
                    "**/.history/**",
                    "**/vendor/**/vendor/**"
                ]
            },
            "stubs": [
                "apache", "bcmath", "bz2", "calendar", "com_dotnet", "Core",
                "ctype", "curl", "date", "dba", "dom", "enchant", "exif",
                "FFI", "fileinfo", "filter", "fpm", "ftp", "gd", "gettext",
                "gmp", "hash", "iconv", "imap", "intl", "json", "ldap",
                "libxml", "mbstring", "meta", "mysqli", "oci8", "odbc",
                "openssl", "pcntl", "pcre", "PDO", "pdo_ibm", "pdo_mysql",
                "pdo_pgsql", "pdo_sqlite", "pgsql", "Phar", "posix",
                "pspell", "readline", "Reflection", "session", "shmop",
                "SimpleXML", "snmp", "soap", "sockets", "sodium", "SPL",
                "sqlite3", "standard", "superglobals", "sysvmsg", "sysvsem",
                "sysvshm", "tidy", "tokenizer", "xml", "xmlreader",
                "xmlrpc", "xmlwriter", "xsl", "Zend OPcache", "zip", "zlib"
            ],
            "completion": {
                "insertUseDeclaration": true,
                "fullyQualifyGlobalConstantsAndFunctions": false,
                "triggerParameterHints": true,
                "maxItems": 100
            },
            "format": {
                "enable": true
            },
            "environment": {
                "documentRoot": null,
                "includePaths": []
            },
            "runtime": null,
            "maxMemory": null,
            "licenceKey": null,
            "telemetry": {
                "enabled": false
            },
            "trace": {
                "server": "verbose"
            }
        }
    })
}

/// Parameters for the `initialize` request: root location, the client
/// capability surface the bridge advertises on behalf of its editors, and
/// the intelephense storage/licence options.
#[must_use]
pub fn initialize_params(dir: &str, storage: &str, name: &str, license: Option<&str>) -> Value {
    let root_uri = format!("file://{dir}");

    json!({
        "processId": std::process::id(),
        "rootPath": dir,
        "rootUri": root_uri,
        "initializationOptions": {
            "storagePath": storage,
            "licenceKey": license,
            "files.maxSize": 3_000_000,
        },
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": true,
                    "didSave": true,
                    "willSaveWaitUntil": true
                },
                "publishDiagnostics": {
                    "relatedInformation": true
                },
                "completion": {
                    "dynamicRegistration": true,
                    "contextSupport": true,
                    "completionItem": {
                        "snippetSupport": true,
                        "commitCharactersSupport": true,
                        "documentationFormat": ["markdown", "plaintext"],
                        "deprecatedSupport": true,
                        "preselectSupport": true
                    }
                },
                "hover": {
                    "dynamicRegistration": true,
                    "contentFormat": ["markdown", "plaintext"]
                },
                "signatureHelp": {
                    "dynamicRegistration": true,
                    "signatureInformation": {
                        "documentationFormat": ["markdown", "plaintext"]
                    }
                },
                "codeLens": {
                    "dynamicRegistration": true
                },
                "formatting": {
                    "dynamicRegistration": true
                },
                "rangeFormatting": {
                    "dynamicRegistration": true
                },
                "onTypeFormatting": {
                    "dynamicRegistration": true
                },
                "rename": {
                    "dynamicRegistration": true,
                    "prepareSupport": true
                },
                "documentLink": {
                    "dynamicRegistration": true
                },
                "typeDefinition": {
                    "dynamicRegistration": true,
                    "linkSupport": true
                },
                "implementation": {
                    "dynamicRegistration": true,
                    "linkSupport": true
                },
                "declaration": {
                    "dynamicRegistration": true,
                    "linkSupport": true
                },
                "colorProvider": {
                    "dynamicRegistration": true
                },
                "foldingRange": {
                    "dynamicRegistration": true,
                    "rangeLimit": 5000,
                    "lineFoldingOnly": true
                }
            },
            "workspace": {
                "applyEdit": true,
                "didChangeConfiguration": {
                    "dynamicRegistration": true
                },
                "configuration": true,
                "executeCommand": {
                    "dynamicRegistration": true
                },
                "workspaceFolders": true,
                "symbol": {
                    "dynamicRegistration": true,
                    "symbolKind": {
                        "valueSet": [
                            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13,
                            14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25
                        ]
                    }
                },
                "workspaceEdit": {
                    "documentChanges": true,
                    "failureHandling": "textOnlyTransactional",
                    "resourceOperations": ["create", "rename", "delete"]
                },
                "didChangeWatchedFiles": {
                    "dynamicRegistration": true
                }
            }
        },
        "workspaceFolders": [
            {
                "uri": root_uri,
                "name": name
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_core_keys() {
        let settings = configuration();
        let php = &settings["intelephense"];

        assert_eq!(php["files"]["maxSize"], 3_000_000);
        assert_eq!(php["telemetry"]["enabled"], false);
        assert_eq!(php["trace"]["server"], "verbose");
        assert_eq!(php["format"]["enable"], true);
        assert_eq!(php["completion"]["maxItems"], 100);
    }

    #[test]
    fn test_configuration_stubs_and_excludes() {
        let settings = configuration();
        let php = &settings["intelephense"];

        let stubs = php["stubs"].as_array().map(Vec::len).unwrap_or(0);
        assert!(stubs > 60, "expected the full stub list, got {stubs}");
        assert!(
            php["stubs"]
                .as_array()
                .is_some_and(|s| s.iter().any(|v| v == "Core"))
        );

        assert!(
            php["files"]["exclude"]
                .as_array()
                .is_some_and(|e| e.iter().any(|v| v == "**/node_modules/**"))
        );
    }

    #[test]
    fn test_initialize_params_root() {
        let params = initialize_params("/p", "/tmp/intelephense/", "phpProject", None);

        assert_eq!(params["rootUri"], "file:///p");
        assert_eq!(params["rootPath"], "/p");
        assert_eq!(params["workspaceFolders"][0]["uri"], "file:///p");
        assert_eq!(params["workspaceFolders"][0]["name"], "phpProject");
        assert_eq!(
            params["initializationOptions"]["storagePath"],
            "/tmp/intelephense/"
        );
        assert!(params["initializationOptions"]["licenceKey"].is_null());
    }

    #[test]
    fn test_initialize_params_license() {
        let params = initialize_params("/p", "/s", "n", Some("ABC123"));
        assert_eq!(params["initializationOptions"]["licenceKey"], "ABC123");
    }

    #[test]
    fn test_initialize_capabilities_surface() {
        let params = initialize_params("/p", "/s", "n", None);
        let text = &params["capabilities"]["textDocument"];
        let workspace = &params["capabilities"]["workspace"];

        assert_eq!(text["completion"]["completionItem"]["snippetSupport"], true);
        assert_eq!(text["hover"]["contentFormat"][0], "markdown");
        assert_eq!(text["rename"]["prepareSupport"], true);
        assert_eq!(text["foldingRange"]["rangeLimit"], 5000);
        assert_eq!(text["foldingRange"]["lineFoldingOnly"], true);
        assert_eq!(text["typeDefinition"]["linkSupport"], true);

        assert_eq!(workspace["applyEdit"], true);
        assert_eq!(workspace["workspaceFolders"], true);
        assert_eq!(
            workspace["symbol"]["symbolKind"]["valueSet"]
                .as_array()
                .map(Vec::len),
            Some(25)
        );
        assert_eq!(
            workspace["workspaceEdit"]["failureHandling"],
            "textOnlyTransactional"
        );
    }
}
