//! The MCP tool catalogue.
//!
//! Both providers' tools are always listed regardless of source mode —
//! the dispatcher interprets the mode per call. `tavily_research` is the
//! one policy-gated entry.

use serde_json::json;

use crate::mcp::protocol::ToolDef;

/// The tool list for `tools/list`.
pub fn tool_definitions(research_enabled: bool) -> Vec<ToolDef> {
    let mut tools = vec![
        ToolDef {
            name: "tavily_search".into(),
            description: "Web search via the Tavily API. Returns ranked results with \
                          title, url, and content."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "max_results": { "type": "number", "description": "Maximum results (default 10)" },
                    "search_depth": { "type": "string", "enum": ["basic", "advanced"] },
                    "topic": { "type": "string", "enum": ["general", "news", "finance"] },
                    "include_answer": { "type": "boolean" },
                    "include_domains": { "type": "array", "items": { "type": "string" } },
                    "exclude_domains": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["query"]
            }),
        },
        ToolDef {
            name: "tavily_extract".into(),
            description: "Extract page content from one or more URLs.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "urls": { "type": "array", "items": { "type": "string" } },
                    "extract_depth": { "type": "string", "enum": ["basic", "advanced"] },
                    "format": { "type": "string", "enum": ["markdown", "text"] }
                },
                "required": ["urls"]
            }),
        },
        ToolDef {
            name: "tavily_crawl".into(),
            description: "Crawl a site starting from a root URL and return page content.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Root URL to crawl" },
                    "max_depth": { "type": "number" },
                    "max_breadth": { "type": "number" },
                    "limit": { "type": "number" },
                    "instructions": { "type": "string" }
                },
                "required": ["url"]
            }),
        },
        ToolDef {
            name: "tavily_map".into(),
            description: "Map a site's structure starting from a root URL.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Root URL to map" },
                    "max_depth": { "type": "number" },
                    "max_breadth": { "type": "number" },
                    "limit": { "type": "number" }
                },
                "required": ["url"]
            }),
        },
        ToolDef {
            name: "brave_web_search".into(),
            description: "Web search via the Brave Search API. Supports offset \
                          pagination."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "q": { "type": "string", "description": "Search query" },
                    "count": { "type": "number", "description": "Results per page (max 20)" },
                    "offset": { "type": "number", "description": "Page offset" },
                    "country": { "type": "string" },
                    "search_lang": { "type": "string" }
                },
                "required": ["q"]
            }),
        },
        ToolDef {
            name: "brave_local_search".into(),
            description: "Local business/point-of-interest search via Brave.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "q": { "type": "string", "description": "Search query, e.g. \"pizza near Alexanderplatz\"" },
                    "count": { "type": "number" }
                },
                "required": ["q"]
            }),
        },
    ];

    if research_enabled {
        tools.push(ToolDef {
            name: "tavily_research".into(),
            description: "In-depth multi-step research on a topic. Long-running; the \
                          gateway polls until the report is ready."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "input": { "type": "string", "description": "Research question" },
                    "model": { "type": "string", "enum": ["mini", "pro"] }
                },
                "required": ["input"]
            }),
        });
    }

    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_tool_is_policy_gated() {
        let with = tool_definitions(true);
        let without = tool_definitions(false);
        assert!(with.iter().any(|t| t.name == "tavily_research"));
        assert!(!without.iter().any(|t| t.name == "tavily_research"));
        assert_eq!(with.len(), without.len() + 1);
    }

    #[test]
    fn both_providers_listed_regardless_of_mode() {
        let tools = tool_definitions(false);
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"tavily_search"));
        assert!(names.contains(&"brave_web_search"));
        assert!(names.contains(&"brave_local_search"));
    }

    #[test]
    fn schemas_declare_required_fields() {
        for tool in tool_definitions(true) {
            let required = tool.input_schema["required"]
                .as_array()
                .unwrap_or_else(|| panic!("{} lacks required fields", tool.name));
            assert!(!required.is_empty());
        }
    }
}
