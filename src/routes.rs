//! Route guard decisions for the app shell.
//!
//! Pure logic only: given a destination and the current session snapshot,
//! decide whether to render, wait, or redirect. Admin access is a
//! backend-issued role claim on the user, never a client-side identity
//! comparison.

use uuid::Uuid;

use crate::session::SessionSnapshot;

/// The routed pages of the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Login,
    SignUp,
    Dashboard,
    Profile,
    ProfileSetup,
    Matches,
    Chat(Uuid),
    Search,
    Admin,
}

impl Route {
    /// Whether the route requires a signed-in user
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Route::Home | Route::Login | Route::SignUp)
    }

    /// Whether the route additionally requires the admin role
    pub fn admin_only(&self) -> bool {
        matches!(self, Route::Admin)
    }
}

/// The guard's verdict for a navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Session still resolving; render nothing yet
    Pending,
    /// Render the destination
    Allow,
    /// Not signed in; go to login carrying the intended destination
    RedirectToLogin { intended: Route },
    /// Signed in but not allowed here; silently land on the dashboard
    RedirectToDashboard,
}

/// Decide what happens for a navigation to `route`
pub fn decide(route: Route, snapshot: &SessionSnapshot) -> RouteDecision {
    if !route.requires_auth() {
        return RouteDecision::Allow;
    }

    if snapshot.loading {
        return RouteDecision::Pending;
    }

    let Some(user) = snapshot.user.as_ref() else {
        return RouteDecision::RedirectToLogin { intended: route };
    };

    if route.admin_only() && !user.is_admin() {
        return RouteDecision::RedirectToDashboard;
    }

    RouteDecision::Allow
}
