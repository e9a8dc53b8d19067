//! Demonstrates C7 intent routing (§4.7): a handful of representative chat
//! messages run through `classify`/`route_for`, printing the intent each one
//! lands on and the route that follows from it.

use orchestrator_core::{classify, route_for};

const SAMPLE_MESSAGES: &[&str] = &[
    "/execute pr-deployment",
    "implement the feature then write tests and deploy it",
    "fix the login bug",
    "where is the config file?",
    "what does this service do?",
];

fn main() {
    let context = serde_json::json!({});
    for message in SAMPLE_MESSAGES {
        let intent = classify(message, &context);
        let route = route_for(intent);
        println!("{message:?} -> {intent:?} -> {route:?}");
    }
}
