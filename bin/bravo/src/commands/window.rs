//! Window command - Dump window contents with string keys and string maps.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use bravo_core::{MapCodec, ReaderConfig, StringCodec};
use bravo_reader::{for_window_state_entries, OperatorStateReader, WindowEntry};

type StringWindow = WindowEntry<String, BTreeMap<String, String>>;

pub async fn execute(
    location: &Path,
    uid: &str,
    kv: bool,
    config: ReaderConfig,
    format: &str,
) -> Result<()> {
    let reader = OperatorStateReader::open(location, uid, config).await?;
    let entries = read_sorted(&reader).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&to_json(&entries, kv))?);
    } else {
        print_table(&entries, kv);
    }
    Ok(())
}

async fn read_sorted(reader: &OperatorStateReader) -> Result<Vec<StringWindow>> {
    let descriptor =
        for_window_state_entries(StringCodec, MapCodec::new(StringCodec, StringCodec));
    let mut entries: Vec<StringWindow> = reader
        .read(&descriptor)
        .await?
        .into_iter()
        .map(|e| WindowEntry {
            window: e.window,
            key: e.key,
            contents: e.contents.into_iter().collect(),
        })
        .collect();
    entries.sort_by(|l, r| (&l.key, l.window).cmp(&(&r.key, r.window)));
    Ok(entries)
}

fn print_table(entries: &[StringWindow], kv: bool) {
    println!("Windows ({})", entries.len());
    println!("{}", "=".repeat(80));
    for entry in entries {
        let contents = entry
            .contents
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        let window = entry.window.to_string();
        if kv {
            println!("{:<20} {:<24} {{{}}}", super::clip(&entry.key, 20), window, contents);
        } else {
            println!("{:<24} {{{}}}", window, contents);
        }
    }
}

fn to_json(entries: &[StringWindow], kv: bool) -> serde_json::Value {
    if kv {
        serde_json::Value::Array(
            entries
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "key": e.key,
                        "window": { "start": e.window.start, "end": e.window.end },
                        "contents": e.contents,
                    })
                })
                .collect(),
        )
    } else {
        serde_json::json!(entries.iter().map(|e| &e.contents).collect::<Vec<_>>())
    }
}
