use std::path::{Path, PathBuf};

use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn setup_fixture(root: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let docs = root.join("docs");
    std::fs::create_dir_all(&docs)?;
    std::fs::write(docs.join("hello.md"), "# Hello\nHello world\nSecond line\n")?;
    std::fs::write(docs.join("other.txt"), "Nothing to see\n")?;
    Ok(docs)
}

fn call(
    name: &str,
    args: serde_json::Value,
) -> CallToolRequestParams {
    let mut params = CallToolRequestParams::new(name.to_string());
    params.arguments = args.as_object().cloned();
    params
}

#[tokio::test]
async fn mcp_stdio_build_and_search_roundtrip()
-> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    let docs = setup_fixture(tempdir.path())?;
    let data_dir = tempdir.path().join("data");

    let bin = docshelf_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp").env("DOCSHELF_DATA_DIR", &data_dir);
        }),
    )?;

    let client = ().serve(transport).await?;

    let built = client
        .peer()
        .call_tool(call(
            "docshelf_build",
            json!({ "name": "notes", "path": docs, "maxConcurrency": 2 }),
        ))
        .await?;
    let report = built.structured_content.expect("build report");
    assert_eq!(report["successful"].as_array().map(Vec::len), Some(2));
    assert_eq!(report["failed"].as_array().map(Vec::len), Some(0));

    let result = client
        .peer()
        .call_tool(call(
            "docshelf_search",
            json!({ "index": "notes", "query": "hello", "limit": 5 }),
        ))
        .await?;

    let structured = result.structured_content.expect("structured content");
    let results = structured
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results array");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].get("title").and_then(|v| v.as_str()), Some("Hello"));
    assert_eq!(
        results[0].get("docType").and_then(|v| v.as_str()),
        Some("markdown")
    );

    let listed = client
        .peer()
        .call_tool(call("docshelf_list", json!({})))
        .await?;
    assert_eq!(
        listed.structured_content.expect("list")["indexes"],
        json!(["notes"])
    );

    client.cancel().await?;
    Ok(())
}

fn docshelf_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_docshelf") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("docshelf");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
