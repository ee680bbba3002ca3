use orderly_core::catalog::MenuCatalog;
use serde_json::json;

pub fn run(json: bool) -> String {
    let catalog = MenuCatalog::burger_menu();
    if json {
        return render_json(&catalog);
    }

    let mut lines = vec!["burger menu:".to_string()];
    lines.extend(
        catalog
            .items()
            .iter()
            .map(|item| format!("- [{:>2}] {} ({} KRW)", item.id.0, item.name, item.unit_price)),
    );
    lines.push("options:".to_string());
    lines.extend(
        catalog
            .options()
            .iter()
            .map(|option| {
                format!("- [{:>2}] {} (+{} KRW)", option.id.0, option.name, option.unit_price)
            }),
    );
    lines.join("\n")
}

fn render_json(catalog: &MenuCatalog) -> String {
    let payload = json!({ "burgerItems": catalog.items(), "options": catalog.options() });
    serde_json::to_string_pretty(&payload)
        .unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"))
}
