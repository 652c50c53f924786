use context_protocol::NeighborBundle;

/// Human-readable listing of a bundle grouped by source.
pub fn render_bundle(document: &str, language_id: &str, bundle: &NeighborBundle) -> String {
    let mut out = String::new();
    out.push_str(&format!("Neighbors for {document} ({language_id})\n"));

    if bundle.files.is_empty() {
        out.push_str("  (no neighbor files)\n");
    }
    for (kind, uris) in &bundle.attribution {
        if uris.is_empty() {
            continue;
        }
        out.push_str(&format!("\n[{kind}]\n"));
        for uri in uris {
            if let Some(file) = bundle.files.get(uri) {
                out.push_str(&format!(
                    "  {:<48} {:>8} chars\n",
                    file.relative_path,
                    file.budget_len()
                ));
            }
        }
    }

    if !bundle.traits.is_empty() {
        out.push_str("\nTraits:\n");
        for item in &bundle.traits {
            out.push_str(&format!("  {} = {}\n", item.name, item.value));
        }
    }

    out.push_str(&format!(
        "\nTotal: {} files, {} chars\n",
        bundle.files.len(),
        bundle.total_chars()
    ));
    out
}
