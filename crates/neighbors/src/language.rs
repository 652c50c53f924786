use std::path::Path;

/// Languages whose files are interchangeable as completion context.
const LANGUAGE_GROUPS: &[&[&str]] = &[
    &["c", "cpp", "objective-c", "objective-cpp", "cuda-cpp"],
    &["javascript", "javascriptreact"],
    &["typescript", "typescriptreact"],
];

/// Canonical id used to compare two language ids.
///
/// Ids inside a group collapse to the group's first member; any other id is
/// only equivalent to itself.
pub fn language_group(language_id: &str) -> &str {
    LANGUAGE_GROUPS
        .iter()
        .find(|group| group.contains(&language_id))
        .map_or(language_id, |group| group[0])
}

/// Whether a document of `candidate` language may serve as a neighbor for a
/// document of `current` language.
pub fn languages_match(current: &str, candidate: &str) -> bool {
    current == candidate || language_group(current) == language_group(candidate)
}

/// Detect a language id from a file extension
pub fn language_id_for_extension(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "rs" => "rust",
        "py" | "pyw" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "m" => "objective-c",
        "mm" => "objective-cpp",
        "cu" | "cuh" => "cuda-cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "md" | "markdown" => "markdown",
        _ => "plaintext",
    }
}

/// Detect a language id from a file path
pub fn language_id_for_path(path: impl AsRef<Path>) -> &'static str {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or("plaintext", language_id_for_extension)
}
