//! In-process model of the Jungle Gym app for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use jungle_e2e::driver::fixture::{FixtureApp, FixtureNode, FixturePage};
use jungle_e2e::scenarios::DOCK;
use jungle_e2e::spec::SelectOption;
use jungle_e2e::{FixtureDriver, HarnessConfig};

pub const BASE_URL: &str = "http://jungle.test";

/// Home, tribe and stats tabs with the activity tracker, notifications,
/// leaderboard popup and profile page
pub struct JungleGym;

fn display_name(page: &FixturePage) -> Option<String> {
    let raw = page.boot.get("current_user_profile")?;
    let profile: serde_json::Value = serde_json::from_str(raw).ok()?;
    profile["displayName"].as_str().map(str::to_string)
}

fn dock(nodes: &mut Vec<FixtureNode>) {
    for tab in ["Home", "Tribe", "Stats"] {
        nodes.push(
            FixtureNode::new(format!("dock-{}", tab.to_lowercase()))
                .role("button")
                .name(tab)
                .css(DOCK),
        );
    }
}

impl FixtureApp for JungleGym {
    fn render(&self, page: &FixturePage) -> Vec<FixtureNode> {
        let mut nodes = vec![FixtureNode::new("title").text("Panda Jungle Gym").css("h1")];

        if page.boot.get("tutorial_seen").map(String::as_str) != Some("true") {
            nodes.push(FixtureNode::new("tutorial").text("Welcome to the jungle!"));
            return nodes;
        }

        let name = display_name(page).unwrap_or_else(|| "NewUser".to_string());
        nodes.push(FixtureNode::new("greeting").text(format!("Hi, {}!", name)));
        nodes.push(
            FixtureNode::new("bell")
                .role("button")
                .label("Notifications")
                .css("button[aria-label='Notifications']"),
        );
        nodes.push(FixtureNode::new("avatar").role("img").css("img[src*='panda']"));

        if page.flag("notifications") {
            nodes.push(FixtureNode::new("notification").text("Mock Notification with Image"));
            nodes.push(
                FixtureNode::new("attachment")
                    .role("img")
                    .name("Attachment")
                    .css("img[alt='Attachment']"),
            );
        }

        if page.flag("profile") {
            nodes.push(FixtureNode::new("points-label").text("Points"));
            nodes.push(FixtureNode::new("points-card").role("button").text("Points"));
            if page.flag("points_history") {
                nodes.push(FixtureNode::new("points-history").text("Points History"));
            }
            dock(&mut nodes);
            return nodes;
        }

        match page.get("tab").unwrap_or("home") {
            "tribe" => {
                nodes.push(
                    FixtureNode::new("leader")
                        .text(name.clone())
                        .css(".flex.items-center.justify-between"),
                );
                if let Some(minutes) = page.get("logged") {
                    nodes.push(FixtureNode::new("feed").text(format!("{} earned {} vibes", name, minutes)));
                    nodes.push(FixtureNode::new("feed-heart").css(".lucide-heart"));
                }
                if page.flag("popup") {
                    nodes.push(FixtureNode::new("xp-button").role("button").text("View XP History"));
                    if page.flag("xp_history") {
                        nodes.push(FixtureNode::new("xp-history").text("XP History"));
                    }
                }
            }
            "stats" => {
                nodes.push(FixtureNode::new("history-button").role("button").text("Workout History"));
                if page.flag("history") {
                    if let Some(minutes) = page.get("logged") {
                        nodes.push(FixtureNode::new("history-entry").text(format!("Wellbeing · {} vibes", minutes)));
                        nodes.push(FixtureNode::new("history-heart").css(".lucide-heart"));
                    }
                }
            }
            _ => {
                nodes.push(FixtureNode::new("track").role("button").text("Track Activity"));
                if page.flag("tracker") {
                    nodes.push(FixtureNode::new("tracker-heading").role("heading").text("Track Activity"));
                    nodes.push(FixtureNode::new("selfie").text("Share Victory Selfie"));
                    nodes.push(FixtureNode::new("category").label("Category").css("select"));
                    nodes.push(FixtureNode::new("duration").label("Duration").css("#duration-input"));
                    if page.get("category") == Some("Wellbeing activities") {
                        nodes.push(FixtureNode::new("vibes").text("Positive Vibes"));
                        if let Some(minutes) = page.get("duration") {
                            nodes.push(FixtureNode::new("vibe-total").text(minutes.to_string()));
                        }
                    }
                    nodes.push(FixtureNode::new("log").role("button").text("Log Workout"));
                }
            }
        }

        dock(&mut nodes);
        nodes
    }

    fn on_click(&self, page: &mut FixturePage, node: &FixtureNode) -> Result<(), String> {
        match node.key.as_str() {
            "bell" => page.set("notifications", "true"),
            "track" => page.set("tracker", "true"),
            "log" => {
                let minutes = page.get("duration").ok_or("duration is required")?.to_string();
                page.set("logged", minutes);
                page.set("tracker", "false");
            }
            "dock-home" => {
                page.set("tab", "home");
                page.set("profile", "false");
            }
            "dock-tribe" => page.set("tab", "tribe"),
            "dock-stats" => page.set("tab", "stats"),
            "history-button" => page.set("history", "true"),
            "leader" => page.set("popup", "true"),
            "xp-button" => page.set("xp_history", "true"),
            "avatar" => page.set("profile", "true"),
            "points-card" => page.set("points_history", "true"),
            _ => {}
        }
        Ok(())
    }

    fn on_fill(&self, page: &mut FixturePage, node: &FixtureNode, value: &str) -> Result<(), String> {
        match node.key.as_str() {
            "duration" => {
                page.set("duration", value);
                Ok(())
            }
            other => Err(format!("{} is not editable", other)),
        }
    }

    fn on_select(&self, page: &mut FixturePage, node: &FixtureNode, option: &SelectOption) -> Result<(), String> {
        if node.key != "category" {
            return Err(format!("{} is not a select", node.key));
        }
        let label = option
            .label
            .clone()
            .or_else(|| option.value.clone())
            .ok_or("empty option")?;
        page.set("category", label);
        Ok(())
    }

    fn on_mouse_click(&self, page: &mut FixturePage, _x: f64, _y: f64) {
        page.set("popup", "false");
        page.set("xp_history", "false");
    }
}

pub fn driver() -> Arc<FixtureDriver> {
    Arc::new(FixtureDriver::new(JungleGym))
}

/// Fast timings against the in-process app
pub fn config(artifacts: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.target.base_url = BASE_URL.to_string();
    config.target.probe = false;
    config.artifacts.dir = artifacts.to_path_buf();
    config.flow.settle_ms = 0;
    config.flow.max_settle_ms = 10;
    config.flow.default_wait_ms = 500;
    config.locate.candidate_timeout_ms = 200;
    config.locate.poll_interval_ms = 10;
    config
}
