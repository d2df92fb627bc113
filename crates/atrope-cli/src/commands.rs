use std::io::{self, Write};

use anyhow::{anyhow, Result};
use atrope_core::cache::CacheManager;
use atrope_core::dispatch::DispatcherManager;
use atrope_core::endorser::ExpectedEndorser;
use atrope_core::source::{ListSource, ListSourceConfig};
use atrope_core::ListManager;
use prettytable::{format, row, Table};

pub async fn index(manager: &ListManager) -> Result<()> {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    table.set_titles(row!["Name", "URL", "Enabled", "Endorser DN"]);

    let mut names: Vec<&String> = manager.lists().keys().collect();
    names.sort();
    for name in names {
        let list = &manager.lists()[name];
        table.add_row(row![
            list.name,
            list.config.url,
            list.config.enabled,
            list.config.endorser.dn
        ]);
    }
    table.printstd();
    Ok(())
}

pub async fn verify(manager: &mut ListManager, list: Option<String>, contents: bool) -> Result<()> {
    match list {
        Some(name) => {
            manager.fetch_list(&name).await.ok();
        }
        None => manager.fetch_lists().await,
    }

    let mut names: Vec<String> = manager.lists().keys().cloned().collect();
    names.sort();
    if let Some(ref only) = list {
        names.retain(|n| n == only);
    }

    for name in names {
        let list = &manager.lists()[&name];
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
        table.add_row(row!["name", list.name]);
        table.add_row(row!["url", list.config.url]);
        table.add_row(row!["enabled", list.config.enabled]);
        table.add_row(row!["endorser dn", list.config.endorser.dn]);
        table.add_row(row!["endorser ca", list.config.endorser.ca]);
        table.add_row(row!["verified", list.verified()]);
        table.add_row(row!["trusted", list.trusted()]);
        table.add_row(row!["expired", list.expired()]);
        table.add_row(row!["token set", list.config.token.is_some()]);
        if let Some(err) = list.error() {
            table.add_row(row!["error", err]);
        }
        table.printstd();

        if contents {
            if let Ok(document) = list.document() {
                println!("{document:#?}");
            }
        }
        println!();
    }
    Ok(())
}

pub async fn cache(manager: &mut ListManager, cache_manager: &CacheManager) -> Result<()> {
    manager
        .cache(cache_manager)
        .await
        .map_err(|e| anyhow!("cache sync failed: {e}"))
}

pub async fn sync(
    manager: &mut ListManager,
    cache_manager: &CacheManager,
    dispatcher_manager: &DispatcherManager,
) -> Result<()> {
    manager
        .sync(cache_manager, dispatcher_manager)
        .await
        .map_err(|e| anyhow!("sync failed: {e}"))
}

#[allow(clippy::too_many_arguments)]
pub fn add(
    manager: &mut ListManager,
    name: Option<String>,
    url: Option<String>,
    endorser_dn: Option<String>,
    endorser_ca: Option<String>,
    token: Option<String>,
    force: bool,
) -> Result<()> {
    let name = name.unwrap_or_else(|| prompt("List name"));
    let url = url.unwrap_or_else(|| prompt("URL"));
    let endorser_dn = endorser_dn.unwrap_or_else(|| prompt("Endorser DN"));
    let endorser_ca = endorser_ca.unwrap_or_else(|| prompt("Endorser CA"));

    let config = ListSourceConfig {
        url,
        enabled: true,
        endorser: ExpectedEndorser {
            dn: endorser_dn,
            ca: endorser_ca,
        },
        token,
        prefix: String::new(),
        project: None,
        subscribed_images: vec![],
    };

    let source = ListSource::new(name, config);
    manager
        .add(source, force)
        .map_err(|e| anyhow!("cannot add list source: {e}"))?;
    manager.write()?;
    Ok(())
}

fn prompt(label: &str) -> String {
    print!("{label}: ");
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin().read_line(&mut line).ok();
    line.trim().to_string()
}

pub fn version() {
    println!("atrope {}", env!("CARGO_PKG_VERSION"));
}
