//! Service layer for computing repository health metrics.
//!
//! This module implements `MetricsQuerier`, the main entry point for retrieving metrics. Every
//! metric follows the same steps:
//! 1. Fetching the raw records from GitHub with the pagination style the endpoint uses.
//! 2. Flattening them into typed rows (validated at the parse boundary).
//! 3. Aggregating the rows with the pure functions in [`crate::metrics`].
//!
//! Nothing is cached: every call recomputes from the full history GitHub returns.

use crate::config::{AppConfig, RepoId};
use crate::error::{MetricsError, Result};
use crate::gender::NameGenderTable;
use crate::github::{
    CodeFrequencyWeek, CommitRecord, ContributorRecord, GitHubClient, IssueRecord,
    PullRequestRecord, ReviewRecord, UserProfile,
};
use crate::metrics::{
    self, BusFactor, CodeReview, Contributor, ContributorGender, DailyCount, LinesChanged,
    WeeklyChurn,
};
use crate::pagination::{collect_pages, history_pages, link_pages, offset_pages};
use crate::transport::{OctocrabTransport, Transport};
use chrono::DateTime;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;

pub struct MetricsQuerier<T = OctocrabTransport> {
    client: GitHubClient<T>,
    config: AppConfig,
    genders: Option<NameGenderTable>,
}

impl MetricsQuerier<OctocrabTransport> {
    /// Initializes a new MetricsQuerier talking to GitHub through Octocrab.
    ///
    /// Loads the name/gender reference table when `NAME_GENDER_CSV` is configured.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let transport = OctocrabTransport::new(
            config.github_api_key.as_deref(),
            &config.github_api_url,
            config.request_timeout(),
        )?;
        let mut querier = Self::with_transport(transport, config);

        if let Some(path) = &config.name_gender_csv {
            let table = NameGenderTable::from_path(path)?;
            tracing::info!(path = %path.display(), names = table.len(), "Loaded name/gender table");
            querier.genders = Some(table);
        }

        Ok(querier)
    }
}

impl<T: Transport> MetricsQuerier<T> {
    pub fn with_transport(transport: T, config: &AppConfig) -> Self {
        Self {
            client: GitHubClient::new(transport, config),
            config: config.clone(),
            genders: None,
        }
    }

    pub fn with_gender_table(mut self, table: NameGenderTable) -> Self {
        self.genders = Some(table);
        self
    }

    pub fn client(&self) -> &GitHubClient<T> {
        &self.client
    }

    /// Issues closed per day, keyed by the day each issue was created.
    pub async fn closed_issues(&self, repo_id: &RepoId) -> Result<Vec<DailyCount>> {
        tracing::info!(repo_id = %repo_id, "Computing closed-issues");
        let issues: Vec<IssueRecord> = self
            .linked_listing(repo_id, &format!("issues?state=closed&per_page={}", self.client.per_page()))
            .await?;

        Ok(metrics::count_per_day(issues.into_iter().map(|i| i.created_at)))
    }

    /// Commits per day, walking the commit listing page by page until an empty page.
    pub async fn code_commits(&self, repo_id: &RepoId) -> Result<Vec<DailyCount>> {
        tracing::info!(repo_id = %repo_id, "Computing code-commits");
        let client = &self.client;
        let per_page = client.per_page();
        let pages = offset_pages(
            client,
            move |page| client.repo_url(repo_id, &format!("commits?page={page}&per_page={per_page}")),
            self.config.offset_first_page,
            self.config.max_api_pages,
        );
        let commits: Vec<CommitRecord> = collect_pages(pages).await?;

        Ok(metrics::count_per_day(
            commits.into_iter().map(|c| c.commit.author.date),
        ))
    }

    /// Contributors and their contribution counts, in the order GitHub ranks them.
    pub async fn contributors(&self, repo_id: &RepoId) -> Result<Vec<Contributor>> {
        tracing::info!(repo_id = %repo_id, "Computing contributors");
        let contributors: Vec<ContributorRecord> = self
            .linked_listing(repo_id, &format!("contributors?per_page={}", self.client.per_page()))
            .await?;

        Ok(contributors.into_iter().map(Contributor::from).collect())
    }

    /// Weekly additions, deletions, net change and running line total.
    pub async fn lines_of_code_changed(&self, repo_id: &RepoId) -> Result<Vec<LinesChanged>> {
        tracing::info!(repo_id = %repo_id, "Computing lines-of-code-changed");
        let url = self.client.repo_url(repo_id, "stats/code_frequency");
        // 204 (no history yet) parses as null.
        let weeks: Option<Vec<CodeFrequencyWeek>> = self.client.get_json(&url).await?;

        let weeks = weeks
            .unwrap_or_default()
            .into_iter()
            .map(|week| {
                let date = DateTime::from_timestamp(week.week, 0).ok_or_else(|| {
                    MetricsError::Shape {
                        url: url.clone(),
                        detail: format!("week timestamp {} is out of range", week.week),
                    }
                })?;
                Ok(WeeklyChurn {
                    date: metrics::normalize_date(date),
                    additions: week.additions,
                    deletions: week.deletions,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(metrics::lines_changed(weeks))
    }

    /// Issues (and pull requests) opened per day, following the `next` links over all states.
    pub async fn open_issues(&self, repo_id: &RepoId) -> Result<Vec<DailyCount>> {
        tracing::info!(repo_id = %repo_id, "Computing open-issues");
        let issues: Vec<IssueRecord> = self
            .linked_listing(repo_id, &format!("issues?state=all&per_page={}", self.client.per_page()))
            .await?;

        Ok(metrics::count_per_day(issues.into_iter().map(|i| i.created_at)))
    }

    /// Bus factor over the commit history of the configured branch (default branch if unset).
    ///
    /// `threshold` is a percentage in `(0, 100]`.
    pub async fn bus_factor(&self, repo_id: &RepoId, threshold: f64) -> Result<BusFactor> {
        metrics::validate_threshold(threshold)?;
        let branch = self.config.bus_factor_branch.as_deref();
        tracing::info!(repo_id = %repo_id, threshold, branch = ?branch, "Computing bus-factor");

        let emails = collect_pages(history_pages(
            &self.client,
            repo_id,
            branch,
            self.config.max_api_pages,
        ))
        .await?;

        metrics::bus_factor(emails.as_slice(), threshold)
    }

    /// Gender of contributors whose first name appears in the reference table.
    pub async fn contributors_gender(&self, repo_id: &RepoId) -> Result<Vec<ContributorGender>> {
        let table = self.genders.as_ref().ok_or_else(|| {
            MetricsError::Config("no name/gender table configured (NAME_GENDER_CSV)".to_string())
        })?;
        tracing::info!(repo_id = %repo_id, "Computing contributors-gender");

        let contributors: Vec<ContributorRecord> = self
            .linked_listing(repo_id, &format!("contributors?per_page={}", self.client.per_page()))
            .await?;

        let logins: Vec<String> = contributors.into_iter().map(|c| c.login).collect();
        let profiles: Vec<UserProfile> = stream::iter(logins)
            .map(|login| self.profile(login))
            .buffered(self.concurrency())
            .try_collect()
            .await?;

        Ok(metrics::contributors_gender(
            profiles
                .iter()
                .map(|profile| (profile.login.as_str(), profile.name.as_deref())),
            table,
        ))
    }

    /// Review counts per pull request, joined with the pull request's number, state and
    /// creation time. Results keep the order GitHub lists the pull requests in.
    pub async fn code_reviews(&self, repo_id: &RepoId) -> Result<Vec<CodeReview>> {
        tracing::info!(repo_id = %repo_id, "Computing code-reviews");
        let pulls: Vec<PullRequestRecord> = self
            .linked_listing(repo_id, &format!("pulls?per_page={}", self.client.per_page()))
            .await?;

        let numbers: Vec<u64> = pulls.iter().map(|pull| pull.number).collect();
        let review_counts: Vec<usize> = stream::iter(numbers)
            .map(|number| self.review_count(repo_id, number))
            .buffered(self.concurrency())
            .try_collect()
            .await?;

        Ok(metrics::code_reviews(pulls, review_counts))
    }

    async fn profile(&self, login: String) -> Result<UserProfile> {
        let url = self.client.user_url(&login);
        self.client.get_json(&url).await
    }

    async fn review_count(&self, repo_id: &RepoId, number: u64) -> Result<usize> {
        let reviews: Vec<ReviewRecord> = self
            .linked_listing(
                repo_id,
                &format!("pulls/{number}/reviews?per_page={}", self.client.per_page()),
            )
            .await?;
        Ok(reviews.len())
    }

    /// Every item of a REST listing under the repository, following `next` links.
    async fn linked_listing<R>(&self, repo_id: &RepoId, path: &str) -> Result<Vec<R>>
    where
        R: DeserializeOwned + Send,
    {
        let url = self.client.repo_url(repo_id, path);
        collect_pages(link_pages(&self.client, url, self.config.max_api_pages)).await
    }

    fn concurrency(&self) -> usize {
        self.config.review_concurrency.max(1)
    }
}
