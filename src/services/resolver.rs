//! Route resolution: model name → ordered candidate list.
//!
//! Matching routes are shuffled uniformly for load balancing; the resulting
//! order is also the fallback order.

use crate::core::config::RoutingSettings;
use crate::core::error::{AppError, Result};
use crate::services::route_store::{Route, RouteStore};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Gemini action suffixes that may be glued to a model name.
const GEMINI_ACTION_SUFFIXES: &[&str] = &[":streamGenerateContent", ":generateContent"];

/// Strip a trailing Gemini action from a model name.
pub fn normalize_model(model: &str) -> &str {
    GEMINI_ACTION_SUFFIXES
        .iter()
        .find_map(|suffix| model.strip_suffix(suffix))
        .unwrap_or(model)
}

/// Whether `model` is the redirect keyword, bare or with a `:hint` suffix.
pub fn is_redirect_keyword(model: &str, keyword: &str) -> bool {
    model == keyword
        || model
            .strip_prefix(keyword)
            .is_some_and(|rest| rest.starts_with(':'))
}

/// Resolves model names against the route table.
#[derive(Clone)]
pub struct RouteResolver {
    store: Arc<dyn RouteStore>,
}

impl RouteResolver {
    pub fn new(store: Arc<dyn RouteStore>) -> Self {
        Self { store }
    }

    /// Resolve with the thread-local RNG.
    pub fn resolve(&self, model: &str, settings: &RoutingSettings) -> Result<Vec<Route>> {
        self.resolve_with_rng(model, settings, &mut rand::thread_rng())
    }

    /// Resolve with an explicit RNG so the shuffle can be made deterministic.
    ///
    /// The returned list is non-empty, holds only enabled routes, and has
    /// exactly one element for redirects or when fallback is disabled.
    pub fn resolve_with_rng<R: Rng + ?Sized>(
        &self,
        model: &str,
        settings: &RoutingSettings,
        rng: &mut R,
    ) -> Result<Vec<Route>> {
        let model = normalize_model(model);
        let routes = self.store.routes();

        let redirect = &settings.redirect;
        if redirect.enabled && is_redirect_keyword(model, &redirect.keyword) {
            return self.resolve_redirect(model, settings, &routes, rng);
        }

        let mut candidates: Vec<Route> = routes
            .iter()
            .filter(|r| r.enabled && matches_model(&r.model, model))
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Err(AppError::UnknownModel {
                model: model.to_string(),
                known: known_models(&routes),
            });
        }

        candidates.shuffle(rng);
        if !settings.fallback_enabled {
            candidates.truncate(1);
        }

        tracing::debug!(
            model = %model,
            candidates = ?candidates.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            "Resolved candidate routes"
        );
        Ok(candidates)
    }

    fn resolve_redirect<R: Rng + ?Sized>(
        &self,
        model: &str,
        settings: &RoutingSettings,
        routes: &[Route],
        rng: &mut R,
    ) -> Result<Vec<Route>> {
        let redirect = &settings.redirect;

        let target = if let Some(id) = redirect.target_route_id {
            routes
                .iter()
                .find(|r| r.id == id && r.enabled)
                .cloned()
                .ok_or_else(|| {
                    AppError::RedirectMisconfigured(format!("route id {} is missing or disabled", id))
                })?
        } else if let Some(target_model) = redirect.target_model.as_deref() {
            routes
                .iter()
                .filter(|r| r.enabled && matches_model(&r.model, target_model))
                .collect::<Vec<_>>()
                .choose(rng)
                .map(|r| (*r).clone())
                .ok_or_else(|| {
                    AppError::RedirectMisconfigured(format!(
                        "no enabled route for model '{}'",
                        target_model
                    ))
                })?
        } else {
            return Err(AppError::RedirectMisconfigured(
                "neither target_route_id nor target_model is set".to_string(),
            ));
        };

        tracing::info!(
            model = %model,
            route = %target.name,
            route_id = target.id,
            "Redirect keyword matched"
        );
        Ok(vec![target])
    }

    /// Distinct models advertised by enabled routes, sorted.
    pub fn known_models(&self) -> Vec<String> {
        known_models(&self.store.routes())
    }
}

/// Exact match, or `group/model` suffix match.
fn matches_model(route_model: &str, model: &str) -> bool {
    route_model == model
        || route_model
            .strip_suffix(model)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

fn known_models(routes: &[Route]) -> Vec<String> {
    routes
        .iter()
        .filter(|r| r.enabled)
        .map(|r| r.model.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RedirectConfig;
    use crate::services::route_store::StaticRouteStore;
    use crate::transformer::Protocol;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn route(id: i64, model: &str) -> Route {
        Route::new(id, format!("route-{}", id), model, "http://upstream", Protocol::OpenAI)
    }

    fn resolver(routes: Vec<Route>) -> RouteResolver {
        RouteResolver::new(Arc::new(StaticRouteStore::new(routes)))
    }

    fn ids(routes: &[Route]) -> Vec<i64> {
        let mut ids: Vec<i64> = routes.iter().map(|r| r.id).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_exact_and_suffix_match() {
        let r = resolver(vec![
            route(1, "flash-3"),
            route(2, "group/flash-3"),
            route(3, "other"),
            route(4, "xflash-3"),
        ]);
        let got = r.resolve("flash-3", &RoutingSettings::default()).unwrap();
        assert_eq!(ids(&got), vec![1, 2]);
    }

    #[test]
    fn test_disabled_routes_excluded() {
        let r = resolver(vec![route(1, "m").disabled(), route(2, "m")]);
        let got = r.resolve("m", &RoutingSettings::default()).unwrap();
        assert_eq!(ids(&got), vec![2]);
    }

    #[test]
    fn test_gemini_suffix_stripped() {
        let r = resolver(vec![route(1, "gemini-pro")]);
        let settings = RoutingSettings::default();
        assert_eq!(r.resolve("gemini-pro:streamGenerateContent", &settings).unwrap()[0].id, 1);
        assert_eq!(r.resolve("gemini-pro:generateContent", &settings).unwrap()[0].id, 1);
    }

    #[test]
    fn test_fallback_disabled_truncates() {
        let r = resolver(vec![route(1, "m"), route(2, "m"), route(3, "m")]);
        let settings = RoutingSettings {
            fallback_enabled: false,
            ..Default::default()
        };
        assert_eq!(r.resolve("m", &settings).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_model_lists_known() {
        let r = resolver(vec![route(1, "b"), route(2, "a"), route(3, "a"), route(4, "z").disabled()]);
        let err = r.resolve("nope", &RoutingSettings::default()).unwrap_err();
        assert_matches!(&err, AppError::UnknownModel { model, known } => {
            assert_eq!(model, "nope");
            assert_eq!(known, &vec!["a".to_string(), "b".to_string()]);
        });
        assert!(err.to_string().contains("a, b"));
    }

    fn redirect_settings(route_id: Option<i64>, model: Option<&str>) -> RoutingSettings {
        RoutingSettings {
            redirect: RedirectConfig {
                enabled: true,
                keyword: "proxy_auto".to_string(),
                target_route_id: route_id,
                target_model: model.map(str::to_string),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_redirect_by_route_id() {
        let r = resolver(vec![route(7, "fast"), route(8, "fast"), route(9, "proxy_auto")]);
        let settings = redirect_settings(Some(7), None);
        for model in ["proxy_auto:fast", "proxy_auto"] {
            let got = r.resolve(model, &settings).unwrap();
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].id, 7);
        }
    }

    #[test]
    fn test_redirect_keyword_needs_colon() {
        let r = resolver(vec![route(7, "fast"), route(9, "proxy_automatic")]);
        let got = r
            .resolve("proxy_automatic", &redirect_settings(Some(7), None))
            .unwrap();
        assert_eq!(got[0].id, 9);
    }

    #[test]
    fn test_redirect_by_model() {
        let r = resolver(vec![route(1, "fast"), route(2, "fast")]);
        let got = r.resolve("proxy_auto:x", &redirect_settings(None, Some("fast"))).unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn test_redirect_misconfigured() {
        let r = resolver(vec![route(7, "fast").disabled()]);
        assert_matches!(
            r.resolve("proxy_auto", &redirect_settings(Some(7), None)),
            Err(AppError::RedirectMisconfigured(_))
        );
        assert_matches!(
            r.resolve("proxy_auto", &redirect_settings(None, None)),
            Err(AppError::RedirectMisconfigured(_))
        );
    }

    #[test]
    fn test_redirect_disabled_uses_table() {
        let r = resolver(vec![route(1, "proxy_auto:fast")]);
        let got = r.resolve("proxy_auto:fast", &RoutingSettings::default()).unwrap();
        assert_eq!(got[0].id, 1);
    }

    #[test]
    fn test_seeded_shuffle_is_deterministic() {
        let r = resolver((1..=6).map(|i| route(i, "m")).collect());
        let settings = RoutingSettings::default();
        let a = r.resolve_with_rng("m", &settings, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = r.resolve_with_rng("m", &settings, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(ids(&a), vec![1, 2, 3, 4, 5, 6]);
    }

    proptest! {
        #[test]
        fn prop_never_returns_disabled(
            flags in prop::collection::vec(any::<bool>(), 1..12),
            seed in any::<u64>(),
        ) {
            let routes: Vec<Route> = flags
                .iter()
                .enumerate()
                .map(|(i, enabled)| {
                    let r = route(i as i64, "m");
                    if *enabled { r } else { r.disabled() }
                })
                .collect();
            let r = resolver(routes);
            match r.resolve_with_rng("m", &RoutingSettings::default(), &mut StdRng::seed_from_u64(seed)) {
                Ok(candidates) => {
                    prop_assert!(candidates.iter().all(|c| c.enabled));
                    prop_assert_eq!(candidates.len(), flags.iter().filter(|f| **f).count());
                }
                Err(_) => prop_assert!(flags.iter().all(|f| !f)),
            }
        }
    }
}
