//! §4.4 Context Inferer: a pure classifier that tags a code blob or
//! document with `{area, dominantTech, keywords, isGeneralPurposeReadmeStyle}`
//! for the re-ranker. Scores each candidate area against weighted keyword
//! hits in the title (×2), filename, and up to ~2,000 characters of
//! concatenated sample text; never does I/O.

use crate::models::{Area, InferredContext};
use std::collections::HashMap;

const README_STYLE_THRESHOLD: f64 = 3.0;
const SAMPLE_CHAR_BUDGET: usize = 2_000;
const MAX_KEYWORDS: usize = 15;

struct AreaRule {
    area: Area,
    keywords: &'static [(&'static str, f64)],
    path_hints: &'static [&'static str],
}

const AREA_RULES: &[AreaRule] = &[
    AreaRule {
        area: Area::Frontend,
        keywords: &[
            ("react", 2.0), ("component", 1.5), ("jsx", 2.0), ("tsx", 2.0), ("css", 1.5),
            ("html", 1.0), ("dom", 1.0), ("vue", 2.0), ("svelte", 2.0), ("frontend", 2.5),
            ("ui", 1.0), ("style", 1.0), ("render", 1.0), ("props", 1.5), ("hook", 1.0),
        ],
        path_hints: &["/frontend/", "/ui/", "/components/", "/pages/", "/views/"],
    },
    AreaRule {
        area: Area::Backend,
        keywords: &[
            ("api", 1.5), ("server", 1.5), ("endpoint", 2.0), ("database", 1.5), ("sql", 1.5),
            ("handler", 1.5), ("route", 1.5), ("middleware", 2.0), ("controller", 1.5),
            ("service", 1.0), ("repository", 1.5), ("backend", 2.5), ("auth", 1.0),
        ],
        path_hints: &["/api/", "/server/", "/backend/", "/handlers/", "/services/"],
    },
    AreaRule {
        area: Area::DevOps,
        keywords: &[
            ("docker", 2.0), ("kubernetes", 2.0), ("k8s", 2.0), ("ci", 1.0), ("cd", 1.0),
            ("pipeline", 1.5), ("deploy", 1.5), ("terraform", 2.0), ("helm", 2.0),
            ("infrastructure", 2.0), ("yaml", 0.5), ("workflow", 1.0), ("devops", 2.5),
        ],
        path_hints: &["/.github/", "/ci/", "/deploy/", "/infra/", "/terraform/", "/k8s/"],
    },
    AreaRule {
        area: Area::Mobile,
        keywords: &[
            ("android", 2.0), ("ios", 2.0), ("swift", 2.0), ("kotlin", 2.0), ("flutter", 2.0),
            ("react native", 2.5), ("xcode", 2.0), ("gradle", 1.0), ("mobile", 2.5),
            ("viewcontroller", 2.0), ("activity", 1.0),
        ],
        path_hints: &["/ios/", "/android/", "/mobile/"],
    },
    AreaRule {
        area: Area::DataScience,
        keywords: &[
            ("pandas", 2.0), ("numpy", 2.0), ("dataframe", 2.0), ("model", 1.0), ("training", 1.5),
            ("dataset", 1.5), ("notebook", 1.5), ("pytorch", 2.0), ("tensorflow", 2.0),
            ("regression", 1.5), ("feature", 0.5), ("inference", 1.5), ("ml", 1.0),
        ],
        path_hints: &["/notebooks/", "/models/", "/data/", "/ml/"],
    },
    AreaRule {
        area: Area::ToolingInternal,
        keywords: &[
            ("cli", 1.5), ("build script", 2.0), ("codegen", 2.0), ("linter", 1.5),
            ("tooling", 2.5), ("internal", 1.0), ("bootstrap", 1.0), ("scaffold", 1.5),
            ("generator", 1.0),
        ],
        path_hints: &["/tools/", "/scripts/", "/internal/"],
    },
];

/// Closed technology vocabulary, independently scored (not tied to area).
const TECH_VOCAB: &[(&str, &str, f64)] = &[
    ("react", "React", 2.0), ("vue", "Vue", 2.0), ("svelte", "Svelte", 2.0),
    ("angular", "Angular", 2.0), ("typescript", "TypeScript", 1.5), ("graphql", "GraphQL", 2.0),
    ("docker", "Docker", 2.0), ("kubernetes", "Kubernetes", 2.0), ("postgres", "PostgreSQL", 2.0),
    ("mysql", "MySQL", 2.0), ("sqlite", "SQLite", 2.0), ("redis", "Redis", 2.0),
    ("rust", "Rust", 1.5), ("python", "Python", 1.5), ("golang", "Go", 1.5),
    ("django", "Django", 2.0), ("flask", "Flask", 2.0), ("fastapi", "FastAPI", 2.0),
    ("express", "Express", 2.0), ("tokio", "Tokio", 2.0), ("pytorch", "PyTorch", 2.0),
    ("tensorflow", "TensorFlow", 2.0), ("kafka", "Kafka", 2.0), ("terraform", "Terraform", 2.0),
    ("aws", "AWS", 1.5), ("gcp", "GCP", 1.5), ("azure", "Azure", 1.5),
];

const README_STYLE_KEYWORDS: &[(&str, f64)] = &[
    ("installation", 1.5), ("setup", 1.0), ("usage", 1.0), ("getting started", 1.5),
    ("prerequisites", 1.0), ("license", 0.5), ("contributing", 1.0), ("quickstart", 1.5),
];

const GENERIC_FILENAMES: &[&str] =
    &["readme.md", "runbook.md", "contributing.md", "changelog.md", "license.md", "setup.md", "install.md"];

/// Which `TECH_VOCAB` labels count as a signal for which area, used to
/// boost the area score once `dominantTech` is known (§4.4).
const TECH_AREA_HINTS: &[(&str, Area)] = &[
    ("React", Area::Frontend), ("Vue", Area::Frontend), ("Svelte", Area::Frontend),
    ("Angular", Area::Frontend), ("TypeScript", Area::Frontend), ("GraphQL", Area::Frontend),
    ("Express", Area::Backend), ("Django", Area::Backend), ("Flask", Area::Backend),
    ("FastAPI", Area::Backend), ("Tokio", Area::Backend), ("PostgreSQL", Area::Backend),
    ("MySQL", Area::Backend), ("SQLite", Area::Backend), ("Redis", Area::Backend),
    ("Kafka", Area::Backend), ("Rust", Area::Backend), ("Python", Area::Backend), ("Go", Area::Backend),
    ("Docker", Area::DevOps), ("Kubernetes", Area::DevOps), ("Terraform", Area::DevOps),
    ("AWS", Area::DevOps), ("GCP", Area::DevOps), ("Azure", Area::DevOps),
];
const TECH_AREA_BOOST: f64 = 2.0;

pub fn infer_context(
    path: &str,
    title: &str,
    sample_chunks: &[&str],
    _language: &str,
    area_confidence_floor: f64,
    tech_threshold: f64,
) -> InferredContext {
    let combined_sample: String = sample_chunks.concat().chars().take(SAMPLE_CHAR_BUDGET).collect();
    // title counted twice per "H1×2" weighting.
    let haystack = format!(
        "{} {} {}",
        title.to_lowercase().repeat(2),
        path.to_lowercase(),
        combined_sample.to_lowercase()
    );

    let mut dominant_tech: Vec<(String, f64)> = TECH_VOCAB
        .iter()
        .filter_map(|(keyword, label, weight)| {
            let hits = haystack.matches(keyword).count() as f64;
            let score = hits * weight;
            (score >= tech_threshold).then_some((label.to_string(), score))
        })
        .collect();
    dominant_tech.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let dominant_tech: Vec<String> = dominant_tech.into_iter().map(|(label, _)| label).collect();

    let mut area_scores: HashMap<&'static str, f64> = HashMap::new();
    for rule in AREA_RULES {
        let mut score = 0.0;
        for (keyword, weight) in rule.keywords {
            score += (haystack.matches(keyword).count() as f64) * weight;
        }
        for hint in rule.path_hints {
            if path.to_lowercase().contains(hint) {
                score += 2.0;
            }
        }
        if dominant_tech.iter().any(|tech| {
            TECH_AREA_HINTS.iter().any(|(label, hinted_area)| tech == label && *hinted_area == rule.area)
        }) {
            score += TECH_AREA_BOOST;
        }
        area_scores.insert(area_key(rule.area), score);
    }

    let best = area_scores.iter().max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));

    let area = match best {
        Some((key, score)) if *score >= area_confidence_floor => area_from_key(key),
        _ => fallback_area(path),
    };

    let readme_score: f64 = README_STYLE_KEYWORDS
        .iter()
        .map(|(kw, weight)| (haystack.matches(kw).count() as f64) * weight)
        .sum();
    let filename = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    let is_root_readme = filename == "readme.md" && !path.trim_start_matches('/').contains('/');
    let is_general_purpose_readme_style =
        readme_score >= README_STYLE_THRESHOLD || (is_root_readme && readme_score > 0.0);

    let keywords = extract_keywords(&haystack);

    InferredContext { area, dominant_tech, keywords, is_general_purpose_readme_style }
}

fn extract_keywords(haystack: &str) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in haystack.split(|c: char| !c.is_ascii_alphanumeric()) {
        if word.len() < 4 {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(MAX_KEYWORDS).map(|(w, _)| w.to_string()).collect()
}

fn fallback_area(path: &str) -> Area {
    let lower = path.to_lowercase();
    if GENERIC_FILENAMES.iter().any(|f| lower.ends_with(f)) {
        Area::GeneralProjectDoc
    } else if lower.ends_with(".ts") || lower.ends_with(".tsx") || lower.ends_with(".js") || lower.ends_with(".jsx") {
        Area::GeneralJsTs
    } else if lower.ends_with(".md") || lower.ends_with(".mdx") || lower.ends_with(".rst") {
        Area::GeneralProjectDoc
    } else {
        Area::GeneralTechnical
    }
}

fn area_key(area: Area) -> &'static str {
    match area {
        Area::Frontend => "frontend",
        Area::Backend => "backend",
        Area::DevOps => "devops",
        Area::Mobile => "mobile",
        Area::DataScience => "data_science",
        Area::ToolingInternal => "tooling_internal",
        Area::GeneralTechnical => "general_technical",
        Area::GeneralProjectDoc => "general_project_doc",
        Area::GeneralJsTs => "general_js_ts",
        Area::Unknown => "unknown",
    }
}

fn area_from_key(key: &str) -> Area {
    match key {
        "frontend" => Area::Frontend,
        "backend" => Area::Backend,
        "devops" => Area::DevOps,
        "mobile" => Area::Mobile,
        "data_science" => Area::DataScience,
        "tooling_internal" => Area::ToolingInternal,
        _ => Area::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: f64 = 3.5;
    const THRESHOLD: f64 = 1.8;

    #[test]
    fn frontend_react_component_is_classified_frontend() {
        let sample = "export function Button(props) { return <div className=\"btn\">{props.children}</div>; }";
        let ctx = infer_context("src/components/Button.tsx", "Button", &[sample], "typescript", FLOOR, THRESHOLD);
        assert_eq!(ctx.area, Area::Frontend);
    }

    #[test]
    fn backend_api_handler_is_classified_backend() {
        let sample = "async fn handler(req: Request) -> Result<Response> { db.query(\"SELECT\").await }";
        let ctx = infer_context("src/api/handlers/users.rs", "users", &[sample], "rust", FLOOR, THRESHOLD);
        assert_eq!(ctx.area, Area::Backend);
    }

    #[test]
    fn weak_signal_falls_back_to_general() {
        let ctx = infer_context(
            "notes.txt",
            "notes",
            &["just some plain prose with no tech terms"],
            "text",
            FLOOR,
            THRESHOLD,
        );
        assert_ne!(ctx.area, Area::Frontend);
        assert_ne!(ctx.area, Area::Backend);
    }

    #[test]
    fn root_readme_with_setup_instructions_is_readme_style() {
        let sample = "## Installation\n\nRun setup.sh. See Getting Started for prerequisites.";
        let ctx = infer_context("README.md", "My Project", &[sample], "markdown", FLOOR, THRESHOLD);
        assert!(ctx.is_general_purpose_readme_style);
    }

    #[test]
    fn dominant_tech_detects_known_vocabulary() {
        let sample = "docker docker docker compose kubernetes kubernetes";
        let ctx = infer_context("deploy/README.md", "Deploy", &[sample], "markdown", FLOOR, THRESHOLD);
        assert!(ctx.dominant_tech.contains(&"Docker".to_string()));
        assert!(ctx.dominant_tech.contains(&"Kubernetes".to_string()));
    }

    #[test]
    fn dominant_tech_boosts_the_matching_area_score() {
        // "devops" keyword alone clears the floor (2.5); docker/kubernetes
        // hits also push `dominant_tech`, which should reinforce DevOps
        // rather than leaving the area decision to keyword hits alone.
        let sample = "devops pipeline running docker and kubernetes workloads";
        let ctx = infer_context("infra/notes.md", "Ops notes", &[sample], "markdown", FLOOR, THRESHOLD);
        assert_eq!(ctx.area, Area::DevOps);
        assert!(ctx.dominant_tech.contains(&"Docker".to_string()));
    }

    #[test]
    fn keywords_are_bounded() {
        let sample = (0..50).map(|i| format!("keyword{i}")).collect::<Vec<_>>().join(" ");
        let ctx = infer_context("d.md", "Title", &[sample.as_str()], "markdown", FLOOR, THRESHOLD);
        assert!(ctx.keywords.len() <= 15);
    }
}
