//! Source registry: the configured category/server tree flattened into feed jobs.
//!
//! Categories live in an arena owned by [`Registry`]; each node refers to its
//! parent by [`CategoryId`], so the tree has no reference cycles and nodes
//! never outlive the registry. Both building the tree and walking it use an
//! explicit stack, so nesting depth is bounded only by memory.
//!
//! Settings resolve through a strict override chain:
//! built-in defaults → `[defaults]` → root category → … → leaf category → server.
//! A field left unset in a layer ([`Override::Inherit`]) keeps the value from
//! the layers above it.

use crate::archive::output_dir;
use crate::config::{Config, ConfigError};
use crate::util::validate_url;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Keys that form a settings layer when they appear in a category or server table.
pub const SETTING_KEYS: [&str; 6] = [
    "include-images",
    "download-full-article",
    "enable-filter",
    "filter-element",
    "default-author",
    "title-img",
];

// ============================================================================
// Settings Layers
// ============================================================================

/// One field of a settings layer: either inherited or explicitly set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Override<T> {
    #[default]
    Inherit,
    Set(T),
}

impl<T: Clone> Override<T> {
    /// `self` if set, otherwise `base`.
    pub fn over(&self, base: &Override<T>) -> Override<T> {
        match self {
            Override::Set(_) => self.clone(),
            Override::Inherit => base.clone(),
        }
    }

    /// The set value, or `fallback` if nothing in the chain set it.
    pub fn resolve(self, fallback: T) -> T {
        match self {
            Override::Set(value) => value,
            Override::Inherit => fallback,
        }
    }

    fn resolve_option(self) -> Option<T> {
        match self {
            Override::Set(value) => Some(value),
            Override::Inherit => None,
        }
    }
}

impl<T> From<Option<T>> for Override<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Override::Inherit, Override::Set)
    }
}

/// When to download an entry's full article page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArticlePolicy {
    /// Use feed content when present, otherwise fetch the article.
    #[default]
    Auto,
    /// Always fetch the article and discard feed content.
    Always,
    /// Never fetch; entries without feed content fall back to their summary or are skipped.
    Never,
}

impl From<Option<bool>> for ArticlePolicy {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => ArticlePolicy::Auto,
            Some(true) => ArticlePolicy::Always,
            Some(false) => ArticlePolicy::Never,
        }
    }
}

/// How the archive's author field is filled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthorPolicy {
    /// Use the feed's own authors, or its title when it names none.
    #[default]
    FeedTitle,
    /// Leave the author field out (configured as `default-author = ""`, or only whitespace).
    Omit,
    /// Always use this name.
    Named(String),
}

impl From<Option<String>> for AuthorPolicy {
    fn from(value: Option<String>) -> Self {
        match value {
            None => AuthorPolicy::FeedTitle,
            Some(name) => match name.trim() {
                "" => AuthorPolicy::Omit,
                trimmed if trimmed.len() == name.len() => AuthorPolicy::Named(name),
                trimmed => AuthorPolicy::Named(trimmed.to_string()),
            },
        }
    }
}

/// Per-node settings as written in the configuration; every field may inherit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettingsLayer {
    pub include_images: Override<bool>,
    pub download_full_article: Override<ArticlePolicy>,
    pub enable_filter: Override<bool>,
    pub filter_element: Override<String>,
    pub default_author: Override<AuthorPolicy>,
    pub title_img: Override<String>,
}

impl SettingsLayer {
    /// Layers `self` on top of `base`: fields set here win, the rest come from `base`.
    pub fn over(&self, base: &SettingsLayer) -> SettingsLayer {
        SettingsLayer {
            include_images: self.include_images.over(&base.include_images),
            download_full_article: self
                .download_full_article
                .over(&base.download_full_article),
            enable_filter: self.enable_filter.over(&base.enable_filter),
            filter_element: self.filter_element.over(&base.filter_element),
            default_author: self.default_author.over(&base.default_author),
            title_img: self.title_img.over(&base.title_img),
        }
    }

    /// Fills every inherited field with the built-in default.
    pub fn resolve(self) -> EffectiveSettings {
        let defaults = EffectiveSettings::default();
        EffectiveSettings {
            include_images: self.include_images.resolve(defaults.include_images),
            download_full_article: self
                .download_full_article
                .resolve(defaults.download_full_article),
            enable_filter: self.enable_filter.resolve(defaults.enable_filter),
            filter_element: self
                .filter_element
                .resolve_option()
                .or(defaults.filter_element),
            default_author: self.default_author.resolve(defaults.default_author),
            title_img: self.title_img.resolve_option().or(defaults.title_img),
        }
    }

    /// Reads the settings keys of a category or server table; other keys are ignored.
    pub fn from_table(node: &str, table: &toml::Table) -> Result<SettingsLayer, ConfigError> {
        let mut layer = SettingsLayer::default();
        for (key, value) in table {
            if SETTING_KEYS.contains(&key.as_str()) {
                layer.set(node, key, value)?;
            }
        }
        Ok(layer)
    }

    /// Applies one `key = value` pair from the configuration.
    pub fn set(&mut self, node: &str, key: &str, value: &toml::Value) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidSetting {
            node: node.to_string(),
            key: key.to_string(),
            message: message.to_string(),
        };

        match key {
            "include-images" => {
                let v = value.as_bool().ok_or_else(|| invalid("expected a boolean"))?;
                self.include_images = Override::Set(v);
            }
            "enable-filter" => {
                let v = value.as_bool().ok_or_else(|| invalid("expected a boolean"))?;
                self.enable_filter = Override::Set(v);
            }
            "download-full-article" => {
                let policy = match value {
                    toml::Value::Boolean(b) => ArticlePolicy::from(Some(*b)),
                    toml::Value::String(s) if s.eq_ignore_ascii_case("auto") => ArticlePolicy::Auto,
                    _ => return Err(invalid("expected true, false, or \"auto\"")),
                };
                self.download_full_article = Override::Set(policy);
            }
            "filter-element" => {
                let v = value.as_str().ok_or_else(|| invalid("expected a CSS selector string"))?;
                self.filter_element = Override::Set(v.to_string());
            }
            "default-author" => {
                let v = value.as_str().ok_or_else(|| invalid("expected a string"))?;
                self.default_author = Override::Set(AuthorPolicy::from(Some(v.to_string())));
            }
            "title-img" => {
                let v = value.as_str().ok_or_else(|| invalid("expected a path or URL"))?;
                self.title_img = Override::Set(v.to_string());
            }
            _ => return Err(invalid("unknown setting")),
        }
        Ok(())
    }
}

/// Fully resolved settings for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub include_images: bool,
    pub download_full_article: ArticlePolicy,
    pub enable_filter: bool,
    pub filter_element: Option<String>,
    pub default_author: AuthorPolicy,
    pub title_img: Option<String>,
}

impl Default for EffectiveSettings {
    fn default() -> Self {
        Self {
            include_images: true,
            download_full_article: ArticlePolicy::Auto,
            enable_filter: true,
            filter_element: None,
            default_author: AuthorPolicy::FeedTitle,
            title_img: None,
        }
    }
}

// ============================================================================
// Category Tree
// ============================================================================

/// Index of a category in its registry's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CategoryId(usize);

/// A server as written in the configuration, before URL validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNode {
    pub name: String,
    pub url: Option<String>,
    pub settings: SettingsLayer,
}

#[derive(Debug, Clone)]
enum Child {
    Category(CategoryId),
    Server(ServerNode),
}

/// A named grouping node contributing a directory segment and a settings layer.
#[derive(Debug, Clone)]
pub struct CategoryNode {
    pub name: String,
    pub settings: SettingsLayer,
    parent: Option<CategoryId>,
    children: Vec<Child>,
}

impl CategoryNode {
    pub fn parent(&self) -> Option<CategoryId> {
        self.parent
    }

    /// Child categories in configuration order.
    pub fn categories(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.children.iter().filter_map(|c| match c {
            Child::Category(id) => Some(*id),
            Child::Server(_) => None,
        })
    }

    /// Servers directly in this category, in configuration order.
    pub fn servers(&self) -> impl Iterator<Item = &ServerNode> + '_ {
        self.children.iter().filter_map(|c| match c {
            Child::Server(server) => Some(server),
            Child::Category(_) => None,
        })
    }
}

/// A server with validated URL and fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub url: Url,
    /// Category names from root to leaf; empty for top-level servers.
    pub category_path: Vec<String>,
    pub settings: EffectiveSettings,
}

/// The unit of concurrent work: one server and the directory its archive goes to.
#[derive(Debug, Clone)]
pub struct FeedJob {
    pub server: Arc<ServerConfig>,
    pub output_dir: PathBuf,
}

/// A node left out of the run because its configuration is unusable.
#[derive(Debug)]
pub struct Rejection {
    pub name: String,
    pub category_path: Vec<String>,
    pub error: ConfigError,
}

/// Result of flattening the tree.
#[derive(Debug, Default)]
pub struct JobPlan {
    pub jobs: Vec<FeedJob>,
    pub rejected: Vec<Rejection>,
}

/// Arena-backed category tree plus the global options that shape job output.
#[derive(Debug, Clone)]
pub struct Registry {
    nodes: Vec<CategoryNode>,
    defaults: SettingsLayer,
    use_server_name_directories: bool,
}

impl Registry {
    /// An empty tree containing only the unnamed root category.
    pub fn new(defaults: SettingsLayer, use_server_name_directories: bool) -> Self {
        Self {
            nodes: vec![CategoryNode {
                name: String::new(),
                settings: SettingsLayer::default(),
                parent: None,
                children: Vec::new(),
            }],
            defaults,
            use_server_name_directories,
        }
    }

    pub fn root(&self) -> CategoryId {
        CategoryId(0)
    }

    pub fn category(&self, id: CategoryId) -> &CategoryNode {
        &self.nodes[id.0]
    }

    pub fn add_category(
        &mut self,
        parent: CategoryId,
        name: impl Into<String>,
        settings: SettingsLayer,
    ) -> CategoryId {
        let id = CategoryId(self.nodes.len());
        self.nodes.push(CategoryNode {
            name: name.into(),
            settings,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(Child::Category(id));
        id
    }

    pub fn add_server(&mut self, parent: CategoryId, server: ServerNode) {
        self.nodes[parent.0].children.push(Child::Server(server));
    }

    /// Category names from the root down to `id` (the unnamed root itself excluded).
    pub fn category_path(&self, id: CategoryId) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id.0];
            if node.parent.is_some() {
                path.push(node.name.clone());
            }
            current = node.parent;
        }
        path.reverse();
        path
    }

    /// Merged settings layer in effect inside category `id` (before any server override).
    pub fn inherited_layer(&self, id: CategoryId) -> SettingsLayer {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            chain.push(node_id);
            current = self.nodes[node_id.0].parent;
        }

        chain
            .into_iter()
            .rev()
            .fold(self.defaults.clone(), |acc, node_id| {
                self.nodes[node_id.0].settings.over(&acc)
            })
    }

    /// Validates one server and resolves its effective settings.
    pub fn resolve_server(
        &self,
        parent: CategoryId,
        server: &ServerNode,
    ) -> Result<ServerConfig, ConfigError> {
        self.build_server(parent, server, &self.inherited_layer(parent))
    }

    /// Flattens the tree into feed jobs, depth-first in configuration order.
    ///
    /// Servers that fail validation are reported in [`JobPlan::rejected`] and
    /// left out; they never prevent the other jobs from being planned.
    pub fn jobs(&self, output_root: &Path) -> JobPlan {
        struct Frame {
            id: CategoryId,
            layer: SettingsLayer,
            next: usize,
        }

        let mut plan = JobPlan::default();
        let root = self.root();
        let mut stack = vec![Frame {
            id: root,
            layer: self.nodes[root.0].settings.over(&self.defaults),
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(child) = self.nodes[frame.id.0].children.get(frame.next) else {
                stack.pop();
                continue;
            };
            frame.next += 1;

            match child {
                Child::Category(child_id) => {
                    let layer = self.nodes[child_id.0].settings.over(&frame.layer);
                    stack.push(Frame {
                        id: *child_id,
                        layer,
                        next: 0,
                    });
                }
                Child::Server(server) => match self.build_server(frame.id, server, &frame.layer) {
                    Ok(config) => {
                        let output_dir = output_dir(
                            output_root,
                            &config.category_path,
                            &config.name,
                            self.use_server_name_directories,
                        );
                        plan.jobs.push(FeedJob {
                            server: Arc::new(config),
                            output_dir,
                        });
                    }
                    Err(error) => {
                        tracing::warn!(server = %server.name, error = %error, "Skipping server");
                        plan.rejected.push(Rejection {
                            name: server.name.clone(),
                            category_path: self.category_path(frame.id),
                            error,
                        });
                    }
                },
            }
        }

        plan
    }

    fn build_server(
        &self,
        parent: CategoryId,
        server: &ServerNode,
        inherited: &SettingsLayer,
    ) -> Result<ServerConfig, ConfigError> {
        let raw_url = server
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingUrl {
                server: server.name.clone(),
            })?;
        let url = validate_url(raw_url).map_err(|source| ConfigError::InvalidUrl {
            server: server.name.clone(),
            source,
        })?;

        Ok(ServerConfig {
            name: server.name.clone(),
            url,
            category_path: self.category_path(parent),
            settings: server.settings.over(inherited).resolve(),
        })
    }

    /// Builds the tree from the `[defaults]` and `[servers]` tables.
    ///
    /// Inside `[servers]`, a table with a `url` key, or with no nested tables
    /// at all, is a server; any other table is a category. Settings keys on a
    /// category form its inheritable layer.
    ///
    /// Returns the registry plus the nodes rejected while reading the tree
    /// (invalid settings values). An invalid `[defaults]` table is an error,
    /// since it affects every server.
    pub fn from_config(config: &Config) -> Result<(Registry, Vec<Rejection>), ConfigError> {
        let defaults = SettingsLayer::from_table("defaults", &config.defaults)?;
        let mut registry = Registry::new(defaults, config.use_server_name_directories);
        let mut rejected = Vec::new();

        let root = registry.root();
        let mut stack = vec![(root, &config.servers)];

        while let Some((parent, table)) = stack.pop() {
            let mut nested = Vec::new();

            for (key, value) in table {
                match value {
                    toml::Value::Table(child) if is_server_table(child) => {
                        match read_server(key, child) {
                            Ok(server) => registry.add_server(parent, server),
                            Err(error) => rejected.push(Rejection {
                                name: key.clone(),
                                category_path: registry.category_path(parent),
                                error,
                            }),
                        }
                    }
                    toml::Value::Table(child) => match SettingsLayer::from_table(key, child) {
                        Ok(layer) => {
                            let id = registry.add_category(parent, key.clone(), layer);
                            nested.push((id, child));
                        }
                        Err(error) => {
                            tracing::warn!(category = %key, error = %error, "Skipping category");
                            rejected.push(Rejection {
                                name: key.clone(),
                                category_path: registry.category_path(parent),
                                error,
                            });
                        }
                    },
                    value if SETTING_KEYS.contains(&key.as_str()) => {
                        let node_name = registry.category(parent).name.clone();
                        let mut layer = registry.nodes[parent.0].settings.clone();
                        match layer.set(&node_name, key, value) {
                            Ok(()) => registry.nodes[parent.0].settings = layer,
                            Err(error) => {
                                tracing::warn!(error = %error, "Ignoring invalid category setting");
                                rejected.push(Rejection {
                                    name: node_name,
                                    category_path: registry.category_path(parent),
                                    error,
                                });
                            }
                        }
                    }
                    _ => {
                        tracing::warn!(key = %key, "Unknown key in servers tree, ignoring");
                    }
                }
            }

            stack.extend(nested.into_iter().rev());
        }

        Ok((registry, rejected))
    }
}

fn is_server_table(table: &toml::Table) -> bool {
    table.contains_key("url") || !table.values().any(toml::Value::is_table)
}

fn read_server(name: &str, table: &toml::Table) -> Result<ServerNode, ConfigError> {
    let url = match table.get("url") {
        None => None,
        Some(toml::Value::String(url)) => Some(url.clone()),
        Some(_) => {
            return Err(ConfigError::InvalidSetting {
                node: name.to_string(),
                key: "url".to_string(),
                message: "expected a string".to_string(),
            })
        }
    };

    for key in table.keys() {
        if key != "url" && !SETTING_KEYS.contains(&key.as_str()) {
            tracing::warn!(server = %name, key = %key, "Unknown server key, ignoring");
        }
    }

    Ok(ServerNode {
        name: name.to_string(),
        url,
        settings: SettingsLayer::from_table(name, table)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn registry_from(toml_text: &str) -> (Registry, Vec<Rejection>) {
        let config = Config::parse(toml_text).unwrap();
        Registry::from_config(&config).unwrap()
    }

    fn server(name: &str, url: &str, settings: SettingsLayer) -> ServerNode {
        ServerNode {
            name: name.to_string(),
            url: Some(url.to_string()),
            settings,
        }
    }

    fn images(value: Option<bool>) -> SettingsLayer {
        SettingsLayer {
            include_images: value.into(),
            ..SettingsLayer::default()
        }
    }

    // ========================================================================
    // Override chain
    // ========================================================================

    #[test]
    fn test_builtin_defaults() {
        let settings = SettingsLayer::default().resolve();
        assert!(settings.include_images);
        assert!(settings.enable_filter);
        assert_eq!(settings.download_full_article, ArticlePolicy::Auto);
        assert_eq!(settings.default_author, AuthorPolicy::FeedTitle);
        assert_eq!(settings.filter_element, None);
        assert_eq!(settings.title_img, None);
    }

    #[test]
    fn test_leaf_category_beats_ancestor() {
        let (registry, rejected) = registry_from(
            r#"
[servers.A]
include-images = false
[servers.A.B]
include-images = true
[servers.A.B.C.feed]
url = "https://example.com/feed.xml"
"#,
        );
        assert!(rejected.is_empty());

        let plan = registry.jobs(Path::new("out"));
        assert_eq!(plan.jobs.len(), 1);
        let job = &plan.jobs[0];
        assert_eq!(job.server.category_path, vec!["A", "B", "C"]);
        assert!(job.server.settings.include_images);
    }

    #[test]
    fn test_server_override_beats_categories() {
        let (registry, _) = registry_from(
            r#"
[defaults]
enable-filter = false
download-full-article = true

[servers.News]
default-author = "Desk"

[servers.News.daily]
url = "https://example.com/daily.xml"
default-author = ""
download-full-article = "auto"
"#,
        );
        let plan = registry.jobs(Path::new("out"));
        let settings = &plan.jobs[0].server.settings;

        assert!(!settings.enable_filter);
        assert_eq!(settings.default_author, AuthorPolicy::Omit);
        assert_eq!(settings.download_full_article, ArticlePolicy::Auto);
    }

    #[test]
    fn test_unset_everywhere_uses_global_default() {
        let (registry, _) = registry_from(
            r#"
[servers.A.B.feed]
url = "https://example.com/feed.xml"
"#,
        );
        let plan = registry.jobs(Path::new("out"));
        assert_eq!(plan.jobs[0].server.settings, EffectiveSettings::default());
    }

    #[test]
    fn test_settings_do_not_leak_between_siblings() {
        let (registry, _) = registry_from(
            r#"
[servers.A]
include-images = false
[servers.A.one]
url = "https://example.com/1.xml"

[servers.B.two]
url = "https://example.com/2.xml"
"#,
        );
        let plan = registry.jobs(Path::new("out"));
        assert_eq!(plan.jobs.len(), 2);
        assert!(!plan.jobs[0].server.settings.include_images);
        assert!(plan.jobs[1].server.settings.include_images);
    }

    #[test]
    fn test_article_policy_conversions() {
        assert_eq!(ArticlePolicy::from(None), ArticlePolicy::Auto);
        assert_eq!(ArticlePolicy::from(Some(true)), ArticlePolicy::Always);
        assert_eq!(ArticlePolicy::from(Some(false)), ArticlePolicy::Never);
    }

    #[test]
    fn test_author_policy_conversions() {
        assert_eq!(AuthorPolicy::from(None), AuthorPolicy::FeedTitle);
        assert_eq!(AuthorPolicy::from(Some(String::new())), AuthorPolicy::Omit);
        assert_eq!(
            AuthorPolicy::from(Some("X".to_string())),
            AuthorPolicy::Named("X".to_string())
        );
    }

    #[test]
    fn test_blank_author_is_omitted() {
        assert_eq!(AuthorPolicy::from(Some("   ".to_string())), AuthorPolicy::Omit);
        assert_eq!(
            AuthorPolicy::from(Some(" Desk\t".to_string())),
            AuthorPolicy::Named("Desk".to_string())
        );

        let (registry, _) = registry_from(
            r#"
[servers.daily]
url = "https://example.com/daily.xml"
default-author = "  "
"#,
        );
        let plan = registry.jobs(Path::new("out"));
        assert_eq!(plan.jobs[0].server.settings.default_author, AuthorPolicy::Omit);
    }

    // ========================================================================
    // Tree reading
    // ========================================================================

    #[test]
    fn test_jobs_follow_configuration_order() {
        let (registry, _) = registry_from(
            r#"
[servers.first]
url = "https://example.com/1.xml"
[servers.Group.inner]
url = "https://example.com/2.xml"
[servers.last]
url = "https://example.com/3.xml"
"#,
        );
        let names: Vec<String> = registry
            .jobs(Path::new("out"))
            .jobs
            .iter()
            .map(|j| j.server.name.clone())
            .collect();
        assert_eq!(names, vec!["first", "inner", "last"]);
    }

    #[test]
    fn test_missing_url_is_rejected_not_fatal() {
        let (registry, rejected) = registry_from(
            r#"
[servers.good]
url = "https://example.com/good.xml"
[servers.empty]
include-images = false
[servers.blank]
url = "  "
"#,
        );
        assert!(rejected.is_empty());

        let plan = registry.jobs(Path::new("out"));
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].server.name, "good");
        assert_eq!(plan.rejected.len(), 2);
        assert!(plan
            .rejected
            .iter()
            .all(|r| matches!(r.error, ConfigError::MissingUrl { .. })));
    }

    #[test]
    fn test_malformed_url_is_rejected() {
        let (registry, _) = registry_from(
            r#"
[servers.Cat.bad]
url = "ftp://example.com/feed"
"#,
        );
        let plan = registry.jobs(Path::new("out"));
        assert!(plan.jobs.is_empty());
        assert_eq!(plan.rejected[0].name, "bad");
        assert_eq!(plan.rejected[0].category_path, vec!["Cat"]);
        assert!(matches!(
            plan.rejected[0].error,
            ConfigError::InvalidUrl { .. }
        ));
    }

    #[test]
    fn test_invalid_setting_rejects_server_only() {
        let (registry, rejected) = registry_from(
            r#"
[servers.bad]
url = "https://example.com/bad.xml"
include-images = "yes"
[servers.good]
url = "https://example.com/good.xml"
"#,
        );
        assert_eq!(rejected.len(), 1);
        assert!(matches!(
            rejected[0].error,
            ConfigError::InvalidSetting { .. }
        ));
        assert_eq!(registry.jobs(Path::new("out")).jobs.len(), 1);
    }

    #[test]
    fn test_invalid_category_setting_skips_subtree() {
        let (registry, rejected) = registry_from(
            r#"
[servers.Broken]
enable-filter = 3
[servers.Broken.feed]
url = "https://example.com/feed.xml"
"#,
        );
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].name, "Broken");
        assert!(registry.jobs(Path::new("out")).jobs.is_empty());
    }

    #[test]
    fn test_invalid_defaults_is_fatal() {
        let config = Config::parse("[defaults]\ninclude-images = 1\n").unwrap();
        assert!(matches!(
            Registry::from_config(&config),
            Err(ConfigError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_output_dir_with_server_name_directories() {
        let (registry, _) = registry_from(
            r#"
[servers.Hooks.Unmaintained."Plato Calibre Releases"]
url = "https://example.com/releases.atom"
"#,
        );
        let plan = registry.jobs(Path::new("library"));
        assert_eq!(
            plan.jobs[0].output_dir,
            PathBuf::from("library/Hooks/Unmaintained/Plato Calibre Releases")
        );
    }

    #[test]
    fn test_output_dir_without_server_name_directories() {
        let (registry, _) = registry_from(
            r#"
use-server-name-directories = false
[servers.Hooks.Unmaintained."Plato Calibre Releases"]
url = "https://example.com/releases.atom"
"#,
        );
        let plan = registry.jobs(Path::new("library"));
        assert_eq!(
            plan.jobs[0].output_dir,
            PathBuf::from("library/Hooks/Unmaintained")
        );
    }

    #[test]
    fn test_deep_nesting_without_recursion() {
        let mut registry = Registry::new(SettingsLayer::default(), false);
        let mut parent = registry.root();
        for depth in 0..2_000 {
            let layer = if depth == 10 { images(Some(false)) } else { SettingsLayer::default() };
            parent = registry.add_category(parent, format!("c{depth}"), layer);
        }
        registry.add_server(parent, server("deep", "https://example.com/deep.xml", SettingsLayer::default()));

        let plan = registry.jobs(Path::new("out"));
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].server.category_path.len(), 2_000);
        assert!(!plan.jobs[0].server.settings.include_images);
    }

    #[test]
    fn test_resolve_server_matches_planned_job() {
        let mut registry = Registry::new(SettingsLayer::default(), true);
        let cat = registry.add_category(registry.root(), "Cat", images(Some(false)));
        let node = server("s", "https://example.com/s.xml", SettingsLayer::default());
        registry.add_server(cat, node.clone());

        let resolved = registry.resolve_server(cat, &node).unwrap();
        let plan = registry.jobs(Path::new("out"));
        assert_eq!(*plan.jobs[0].server, resolved);
        assert_eq!(registry.category(cat).parent(), Some(registry.root()));
        assert_eq!(registry.category(cat).servers().count(), 1);
        assert_eq!(registry.category(registry.root()).categories().count(), 1);
    }

    // ========================================================================
    // Properties
    // ========================================================================

    fn arb_override<T: std::fmt::Debug + Clone + 'static>(
        value: impl Strategy<Value = T> + 'static,
    ) -> impl Strategy<Value = Override<T>> {
        prop::option::of(value).prop_map(Override::from)
    }

    fn arb_layer() -> impl Strategy<Value = SettingsLayer> {
        (
            arb_override(any::<bool>()),
            arb_override(prop::option::of(any::<bool>()).prop_map(ArticlePolicy::from)),
            arb_override(any::<bool>()),
            arb_override("[a-z#.]{1,8}"),
            arb_override(prop::option::of("[a-zA-Z ]{0,6}").prop_map(AuthorPolicy::from)),
            arb_override("[a-z/.]{1,8}"),
        )
            .prop_map(
                |(include_images, download_full_article, enable_filter, filter_element, default_author, title_img)| {
                    SettingsLayer {
                        include_images,
                        download_full_article,
                        enable_filter,
                        filter_element,
                        default_author,
                        title_img,
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn prop_layering_is_associative(a in arb_layer(), b in arb_layer(), c in arb_layer()) {
            // c over (b over a) == (c over b) over a
            prop_assert_eq!(c.over(&b.over(&a)), c.over(&b).over(&a));
        }

        #[test]
        fn prop_leaf_most_defined_value_wins(
            defaults in prop::option::of(any::<bool>()),
            chain in prop::collection::vec(prop::option::of(any::<bool>()), 0..8),
            leaf in prop::option::of(any::<bool>()),
        ) {
            let mut registry = Registry::new(images(defaults), true);
            let mut parent = registry.root();
            for (i, value) in chain.iter().enumerate() {
                parent = registry.add_category(parent, format!("c{i}"), images(*value));
            }
            registry.add_server(parent, server("s", "https://example.com/f.xml", images(leaf)));

            let expected = std::iter::once(defaults)
                .chain(chain.iter().copied())
                .chain(std::iter::once(leaf))
                .flatten()
                .last()
                .unwrap_or(true);

            let plan = registry.jobs(Path::new("out"));
            prop_assert_eq!(plan.jobs[0].server.settings.include_images, expected);
        }
    }
}
