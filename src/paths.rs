//! Path classification shared by the Indexer and the Context Retriever:
//! documentation detection, test-file detection, and extension-derived
//! language tags. See GLOSSARY in the specification for the exact rules.

const DOC_EXTENSIONS: &[&str] = &[".md", ".mdx", ".markdown", ".rst", ".adoc", ".txt"];
const DOC_FILENAMES: &[&str] = &["readme", "license", "contributing", "changelog", "copying"];
const DOC_DIRS: &[&str] = &["/docs/", "/documentation/", "/doc/", "/wiki/", "/examples/", "/guides/"];

const TEST_PATH_MARKERS: &[&str] = &["/__tests__/", "/tests/", "/specs/"];
const TEST_NAME_MARKERS: &[&str] = &["_test.", "_spec.", ".test.", ".spec."];

const EXCLUDED_DIRS: &[&str] = &["node_modules", "dist", "build", ".git", "coverage", "vendor"];

const BINARY_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".ico", ".webp", ".pdf", ".zip", ".tar", ".gz",
    ".exe", ".dll", ".so", ".dylib", ".bin", ".woff", ".woff2", ".ttf", ".eot", ".mp3", ".mp4",
    ".mov", ".avi", ".class", ".jar", ".wasm", ".pyc",
];

pub fn is_documentation(path: &str) -> bool {
    let lower = path.to_lowercase();
    if DOC_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return true;
    }
    let filename = lower.rsplit('/').next().unwrap_or(&lower);
    let stem = filename.split('.').next().unwrap_or(filename);
    if DOC_FILENAMES.contains(&stem) {
        return true;
    }
    DOC_DIRS.iter().any(|dir| lower.contains(dir))
}

pub fn is_test_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    TEST_PATH_MARKERS.iter().any(|m| lower.contains(m)) || TEST_NAME_MARKERS.iter().any(|m| lower.contains(m))
}

pub fn is_excluded_dir_component(component: &str) -> bool {
    EXCLUDED_DIRS.contains(&component)
}

pub fn is_binary_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    BINARY_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub fn language_for_extension(path: &str) -> String {
    let lower = path.to_lowercase();
    let ext = lower.rsplit('.').next().unwrap_or("");
    match ext {
        "rs" => "rust",
        "py" => "python",
        "js" => "javascript",
        "jsx" => "javascript",
        "ts" => "typescript",
        "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "php" => "php",
        "c" => "c",
        "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "swift" => "swift",
        "sh" | "bash" => "shell",
        "md" | "mdx" | "markdown" => "markdown",
        "rst" => "rst",
        "adoc" => "adoc",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "toml" => "toml",
        "sql" => "sql",
        "html" => "html",
        "css" | "scss" | "less" => "css",
        _ => "text",
    }
    .to_string()
}

/// Normalizes a path for comparison purposes: absolute-or-relative,
/// with-or-without a trailing slash, all collapse to the same form. Used
/// so "never includes the file under review" holds regardless of how the
/// caller spelled the path (invariant 9).
pub fn normalize_for_comparison(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    trimmed.replace('\\', "/")
}

/// Reduces `file_path` to project-root-relative form before comparison, so
/// invariant 9 holds whether the caller passed an absolute path, a relative
/// one, or one prefixed with `./`.
pub fn relative_to_project(file_path: &str, project_path: &str) -> String {
    let project_norm = normalize_for_comparison(project_path);
    let file_norm = file_path.replace('\\', "/");
    let stripped = file_norm.strip_prefix(project_norm.as_str()).unwrap_or(&file_norm);
    let stripped = stripped.trim_start_matches('/');
    let stripped = stripped.strip_prefix("./").unwrap_or(stripped);
    normalize_for_comparison(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_documentation_by_extension_filename_and_directory() {
        assert!(is_documentation("README.md"));
        assert!(is_documentation("src/docs/guide.txt"));
        assert!(is_documentation("LICENSE"));
        assert!(!is_documentation("src/main.rs"));
    }

    #[test]
    fn recognizes_test_files_by_path_and_name_markers() {
        assert!(is_test_file("src/__tests__/foo.ts"));
        assert!(is_test_file("src/foo.test.ts"));
        assert!(is_test_file("src/foo_spec.rb"));
        assert!(!is_test_file("src/foo.ts"));
    }

    #[test]
    fn excludes_conventional_build_directories() {
        assert!(is_excluded_dir_component("node_modules"));
        assert!(is_excluded_dir_component(".git"));
        assert!(!is_excluded_dir_component("src"));
    }

    #[test]
    fn language_detection_covers_common_extensions() {
        assert_eq!(language_for_extension("src/main.rs"), "rust");
        assert_eq!(language_for_extension("a/b/c.test.tsx"), "typescript");
        assert_eq!(language_for_extension("README.md"), "markdown");
        assert_eq!(language_for_extension("no_extension"), "text");
    }

    #[test]
    fn path_normalization_ignores_trailing_slash_and_separator_style() {
        assert_eq!(normalize_for_comparison("src/main.rs/"), normalize_for_comparison("src/main.rs"));
        assert_eq!(normalize_for_comparison("src\\main.rs"), normalize_for_comparison("src/main.rs"));
    }

    #[test]
    fn relative_to_project_strips_root_prefix_and_dot_slash() {
        assert_eq!(relative_to_project("/repo/src/main.rs", "/repo"), "src/main.rs");
        assert_eq!(relative_to_project("/repo/src/main.rs", "/repo/"), "src/main.rs");
        assert_eq!(relative_to_project("./src/main.rs", "/repo"), "src/main.rs");
        assert_eq!(relative_to_project("src/main.rs/", "/repo"), "src/main.rs");
        assert_eq!(relative_to_project("src/main.rs", "/repo"), "src/main.rs");
    }
}
