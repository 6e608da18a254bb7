//! Built-in verification scenarios for the Panda Jungle Gym app

use std::time::Duration;

use crate::mock::{MockProfile, MockState};
use crate::spec::{Expectation, LoadState, LocatorSpec, Scenario, ScenarioStep, SelectOption, ViewportSpec};

/// Selector of the floating bottom navigation
pub const DOCK: &str = ".fixed.bottom-6.flex button";

/// Every built-in scenario
pub fn catalog() -> Vec<Scenario> {
    vec![
        landing(),
        dashboard_header(),
        dashboard(),
        notifications(),
        wellbeing_logging(),
        victory_photo(),
        points_xp_history(),
    ]
}

/// Built-in scenario by name
pub fn find(name: &str) -> Option<Scenario> {
    catalog().into_iter().find(|s| s.name == name)
}

fn greeting(name: &str) -> LocatorSpec {
    LocatorSpec::new("greeting").text(format!("Hi, {}!", name))
}

/// Dock tab by accessible name, falling back to its position in the dock
fn dock_tab(label: &str, position: i32) -> LocatorSpec {
    LocatorSpec::new(format!("{} tab", label.to_lowercase()))
        .role("button", label)
        .label(label)
        .css(DOCK)
        .nth(position)
}

/// Landing page renders its title
pub fn landing() -> Scenario {
    Scenario::new("landing")
        .describe("Landing page renders the app title")
        .tag("smoke")
        .step(ScenarioStep::navigate("/"))
        .step(ScenarioStep::wait_visible(LocatorSpec::new("title").text("Panda Jungle Gym")))
        .step(ScenarioStep::full_page_screenshot("landing_page"))
}

/// Dashboard header greets the default mock user once the tutorial is skipped
pub fn dashboard_header() -> Scenario {
    Scenario::new("dashboard-header")
        .describe("Header shows the greeting after the tutorial flag is set post-load")
        .tag("dashboard")
        .viewport(ViewportSpec::MOBILE)
        .mock(MockState::tutorial_only())
        .inject_after_load()
        .step(ScenarioStep::navigate("/"))
        .step(ScenarioStep::ApplyMock)
        .step(ScenarioStep::Reload { wait_until: LoadState::Load })
        .step(ScenarioStep::wait_visible_for(greeting("NewUser"), Duration::from_secs(10)))
        .step(ScenarioStep::settle(2_000))
        .step(ScenarioStep::screenshot("dashboard_header"))
}

/// Dashboard of a mocked profile, captured on mobile and desktop
pub fn dashboard() -> Scenario {
    let profile = MockProfile::test_user("TestPanda").with_fitness_level("beginner");

    Scenario::new("dashboard")
        .describe("Dashboard of an injected profile on mobile and desktop")
        .tag("dashboard")
        .tag("smoke")
        .across(&[ViewportSpec::MOBILE, ViewportSpec::DESKTOP])
        .mock(MockState::signed_in(profile))
        .inject_after_load()
        .step(ScenarioStep::navigate("/"))
        .step(ScenarioStep::ApplyMock)
        .step(ScenarioStep::Reload { wait_until: LoadState::Load })
        .step(ScenarioStep::wait_visible_for(greeting("TestPanda"), Duration::from_secs(10)))
        .step(ScenarioStep::screenshot("dashboard"))
}

/// Notification bell opens a notification with an image attachment
pub fn notifications() -> Scenario {
    let bell = LocatorSpec::new("notifications button")
        .label("Notifications")
        .css("button[aria-label='Notifications']")
        .timeout(Duration::from_secs(10));

    Scenario::new("notifications")
        .describe("Notification list renders image attachments")
        .tag("notifications")
        .mock(MockState::tutorial_only())
        .step(ScenarioStep::navigate("/"))
        .step(ScenarioStep::click(bell))
        .step(ScenarioStep::wait_visible(
            LocatorSpec::new("mock notification").text("Mock Notification with Image"),
        ))
        .step(ScenarioStep::wait_visible(
            LocatorSpec::new("attachment").role("img", "Attachment").css("img[alt='Attachment']"),
        ))
        .step(ScenarioStep::screenshot("notification_render"))
}

/// Logging a wellbeing activity awards vibes shown in feed and history
pub fn wellbeing_logging() -> Scenario {
    let vibes = || LocatorSpec::new("vibes display").text("Positive Vibes");
    let heart = || LocatorSpec::new("heart icon").css(".lucide-heart").nth(0);

    Scenario::new("wellbeing-logging")
        .describe("30 minutes at default intensity yields 30 vibes in feed and history")
        .tag("activity")
        .mock(MockState::signed_in(MockProfile::test_user("TestUser").with_auth()))
        .step(ScenarioStep::navigate("/"))
        .step(ScenarioStep::wait_visible(greeting("TestUser")))
        .step(ScenarioStep::click(LocatorSpec::new("track activity").text("Track Activity").nth(0)))
        .step(ScenarioStep::wait_hidden(vibes()))
        .step(
            ScenarioStep::select(
                LocatorSpec::new("category").label("Category").css("select"),
                SelectOption::label("Wellbeing activities"),
            )
            .expecting(Expectation::visible(vibes())),
        )
        .step(ScenarioStep::fill(
            LocatorSpec::new("duration").label("Duration").css("#duration-input"),
            "30",
        ))
        .step(ScenarioStep::wait_visible(LocatorSpec::new("vibe total").text("30").nth(0)))
        .step(ScenarioStep::click(LocatorSpec::new("log workout").text("Log Workout")))
        .step(ScenarioStep::click(dock_tab("Tribe", 1)))
        .step(ScenarioStep::wait_visible(LocatorSpec::new("feed vibes").text_contains("30 vibes").nth(0)))
        .step(ScenarioStep::wait_visible(heart()))
        .step(ScenarioStep::screenshot("wellbeing_feed"))
        .step(ScenarioStep::click(dock_tab("Stats", 2)))
        .step(ScenarioStep::click(LocatorSpec::new("workout history").text("Workout History")))
        .step(ScenarioStep::wait_visible(LocatorSpec::new("history vibes").text_contains("30").nth(0)))
        .step(ScenarioStep::wait_visible(heart()))
        .step(ScenarioStep::screenshot("wellbeing_history"))
}

/// Activity tracker offers the victory selfie option
pub fn victory_photo() -> Scenario {
    Scenario::new("victory-photo")
        .describe("Track Activity modal offers Share Victory Selfie")
        .tag("activity")
        .mock(MockState::tutorial_only())
        .step(ScenarioStep::Navigate {
            url: "/".to_string(),
            wait_until: LoadState::NetworkIdle,
        })
        .step(ScenarioStep::wait_visible_for(greeting("NewUser"), Duration::from_secs(5)))
        .step(
            ScenarioStep::click(LocatorSpec::new("track activity").text("Track Activity").nth(0)).expecting(
                Expectation::visible(LocatorSpec::new("tracker heading").role("heading", "Track Activity")),
            ),
        )
        .step(ScenarioStep::wait_visible(
            LocatorSpec::new("victory selfie").text("Share Victory Selfie"),
        ))
        .step(ScenarioStep::full_page_screenshot("victory_photo_option"))
}

/// XP history from the leaderboard popup and points history from the profile
pub fn points_xp_history() -> Scenario {
    let first_user = LocatorSpec::new("leaderboard entry")
        .text("NewUser")
        .nth(0)
        .css(".flex.items-center.justify-between")
        .nth(0);

    let points_card = LocatorSpec::new("points card").text("Points").nth(-1);

    Scenario::new("points-xp-history")
        .describe("XP breakdown in the profile popup and points history on the profile page")
        .tag("profile")
        .viewport(ViewportSpec::MOBILE)
        .mock(MockState::tutorial_only())
        .inject_after_load()
        .timeout(Duration::from_secs(90))
        .step(ScenarioStep::navigate("/"))
        .step(ScenarioStep::ApplyMock)
        .step(ScenarioStep::Reload { wait_until: LoadState::Load })
        .step(ScenarioStep::wait_visible_for(
            LocatorSpec::new("header").css("h1").nth(0),
            Duration::from_secs(10),
        ))
        .step(ScenarioStep::click(dock_tab("Tribe", 1)))
        .step(ScenarioStep::settle(1_000))
        .step(ScenarioStep::click(first_user))
        .step(ScenarioStep::settle(1_000))
        .step(ScenarioStep::first_of(vec![
            vec![ScenarioStep::click(
                LocatorSpec::new("xp history button").role("button", "View XP History"),
            )],
            vec![ScenarioStep::screenshot("failed_xp_click")],
        ]))
        .step(ScenarioStep::settle(1_000))
        .step(ScenarioStep::screenshot("xp_history"))
        .step(ScenarioStep::ClickAt { x: 10.0, y: 10.0 })
        .step(ScenarioStep::settle(500))
        .step(ScenarioStep::ClickAt { x: 10.0, y: 10.0 })
        .step(ScenarioStep::click(dock_tab("Home", 0)))
        .step(ScenarioStep::settle(500))
        .step(ScenarioStep::click(LocatorSpec::new("avatar").css("img[src*='panda']").nth(0)))
        .step(ScenarioStep::settle(1_000))
        .step(ScenarioStep::first_of(vec![
            vec![
                ScenarioStep::click(points_card),
                ScenarioStep::settle(1_000),
                ScenarioStep::screenshot("points_history"),
            ],
            vec![ScenarioStep::screenshot("failed_points")],
        ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Strategy;

    #[test]
    fn test_catalog_names_unique() {
        let mut names: Vec<String> = catalog().into_iter().map(|s| s.name).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(total, 7);
    }

    #[test]
    fn test_find() {
        assert!(find("wellbeing-logging").is_some());
        assert!(find("nope").is_none());
    }

    #[test]
    fn test_dashboard_runs_on_two_viewports() {
        let dashboard = dashboard();
        assert_eq!(dashboard.matrix, vec![ViewportSpec::MOBILE, ViewportSpec::DESKTOP]);
    }

    #[test]
    fn test_dock_tab_falls_back_to_position() {
        let tab = dock_tab("Tribe", 1);
        let ordered = tab.ordered();
        assert!(matches!(&ordered[0].strategy, Strategy::Role { name: Some(n), .. } if n == "Tribe"));
        assert_eq!(ordered[1].strategy, Strategy::Label { label: "Tribe".to_string() });
        assert_eq!(ordered[2].nth, Some(1));
    }

    #[test]
    fn test_catalog_serializes_to_yaml_and_back() {
        for scenario in catalog() {
            let yaml = serde_yaml::to_string(&scenario).unwrap();
            let parsed = Scenario::from_yaml(&yaml).unwrap();
            assert_eq!(parsed.steps, scenario.steps, "{}", scenario.name);
        }
    }
}
