//! URL construction for Azure OpenAI endpoints
//!
//! Every remote call in this crate addresses either a deployment-scoped
//! route (`openai/deployments/<deployment>/...`) or a service-scoped route
//! (`openai/threads`, `openai/files`, ...), always carrying the
//! `api-version` query parameter. Centralizing the construction here keeps
//! trailing-slash handling consistent across clients.

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use polychat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://res.openai.azure.com"), "https://res.openai.azure.com");
/// assert_eq!(normalize_base_url("https://res.openai.azure.com/"), "https://res.openai.azure.com");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Construct a deployment-scoped endpoint URL
///
/// # Examples
///
/// ```
/// use polychat::utils::url::deployment_url;
///
/// assert_eq!(
///     deployment_url("https://res.openai.azure.com", "gpt-35", "chat/completions", "2024-02-01"),
///     "https://res.openai.azure.com/openai/deployments/gpt-35/chat/completions?api-version=2024-02-01"
/// );
/// ```
pub fn deployment_url(endpoint: &str, deployment: &str, route: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/{}?api-version={}",
        normalize_base_url(endpoint),
        deployment,
        route.trim_start_matches('/'),
        api_version
    )
}

/// Construct a service-scoped endpoint URL (threads, files, assistants)
///
/// # Examples
///
/// ```
/// use polychat::utils::url::service_url;
///
/// assert_eq!(
///     service_url("https://res.openai.azure.com/", "threads", "2024-02-01"),
///     "https://res.openai.azure.com/openai/threads?api-version=2024-02-01"
/// );
/// ```
pub fn service_url(endpoint: &str, route: &str, api_version: &str) -> String {
    format!(
        "{}/openai/{}?api-version={}",
        normalize_base_url(endpoint),
        route.trim_start_matches('/'),
        api_version
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://res.openai.azure.com/v1///"),
            "https://res.openai.azure.com/v1"
        );
        assert_eq!(normalize_base_url(""), "");
        assert_eq!(normalize_base_url("///"), "");
    }

    #[test]
    fn test_deployment_url() {
        assert_eq!(
            deployment_url(
                "https://res.openai.azure.com/",
                "dall-e-3",
                "/images/generations",
                "2024-02-01"
            ),
            "https://res.openai.azure.com/openai/deployments/dall-e-3/images/generations?api-version=2024-02-01"
        );
    }

    #[test]
    fn test_service_url() {
        assert_eq!(
            service_url("https://res.openai.azure.com", "threads/t1/runs", "2024-02-01"),
            "https://res.openai.azure.com/openai/threads/t1/runs?api-version=2024-02-01"
        );
    }
}
