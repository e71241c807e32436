//! Source flags shared by every command.

use allowsync_core::{MergeMode, SourceKind};
use allowsync_engine::{
    EngineConfig, LocalFileLoader, LocalSourceConfig, MissingFilePolicy, RemoteAuth,
    RemoteLoader, RemoteSourceConfig, ReqwestClient, SchedulerBuilder,
};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where identities come from and how they are merged.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Local identity file (JSON array or `{"users": [...]}`)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// What a missing local file means (unavailable, empty)
    #[arg(long, default_value = "unavailable")]
    pub missing_file: MissingFilePolicy,

    /// Remote identity endpoint
    #[arg(short, long)]
    pub url: Option<String>,

    /// Bearer token for the remote endpoint
    #[arg(long, conflicts_with = "api_key")]
    pub token: Option<String>,

    /// API key for the remote endpoint, sent in --api-key-header
    #[arg(long)]
    pub api_key: Option<String>,

    /// Header carrying --api-key
    #[arg(long, default_value = "X-Api-Key")]
    pub api_key_header: String,

    /// Remote request timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// Merge mode (REMOTE_FIRST, LOCAL_FIRST, REMOTE_ONLY, LOCAL_ONLY, UNION, UNION_STRICT)
    #[arg(short, long, default_value = "REMOTE_FIRST")]
    pub mode: MergeMode,

    /// Source whose records win duplicates in the union modes (local, remote)
    #[arg(long, default_value = "remote")]
    pub prefer: SourceKind,
}

impl SourceArgs {
    /// Remote credentials from the flags.
    pub fn auth(&self) -> RemoteAuth {
        match (&self.token, &self.api_key) {
            (Some(token), _) => RemoteAuth::Bearer(token.clone()),
            (None, Some(key)) => RemoteAuth::ApiKey {
                header: self.api_key_header.clone(),
                value: key.clone(),
            },
            (None, None) => RemoteAuth::None,
        }
    }

    /// Applies the merge flags to `config`.
    pub fn apply(&self, config: EngineConfig) -> EngineConfig {
        config
            .with_merge_mode(self.mode)
            .with_union_precedence(self.prefer)
    }

    /// Installs the configured loaders on `builder`.
    ///
    /// # Errors
    ///
    /// Fails if no source is given, or if the HTTP client cannot be built.
    pub fn install(&self, builder: SchedulerBuilder) -> Result<SchedulerBuilder, String> {
        if self.file.is_none() && self.url.is_none() {
            return Err("at least one of --file or --url is required".into());
        }

        let mut builder = builder;
        if let Some(path) = &self.file {
            let config = LocalSourceConfig::new(path).with_missing_policy(self.missing_file);
            builder = builder.with_local(Arc::new(LocalFileLoader::new(config)));
        }
        if let Some(url) = &self.url {
            let config = RemoteSourceConfig::new(url.clone())
                .with_timeout(Duration::from_secs(self.timeout))
                .with_auth(self.auth());
            let client = ReqwestClient::new()?;
            builder = builder.with_remote(Arc::new(RemoteLoader::new(config, client)));
        }
        Ok(builder)
    }
}

/// Parses source flags on their own.
#[cfg(test)]
pub(crate) fn parse_sources(args: &[&str]) -> Result<SourceArgs, clap::Error> {
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        sources: SourceArgs,
    }

    Harness::try_parse_from(std::iter::once("allowsync").chain(args.iter().copied()))
        .map(|harness| harness.sources)
}
