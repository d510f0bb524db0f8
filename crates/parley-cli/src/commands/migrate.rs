use super::context::AppContext;
use anyhow::Result;
use parley_application::MigrationOptions;

pub async fn run(ctx: &AppContext, check: bool, delete_legacy: bool) -> Result<()> {
    let migrator = ctx.migrator();
    if check {
        let needed = migrator.is_migration_needed().await;
        println!(
            "{}",
            if needed {
                "Legacy history found; run `parley migrate` to migrate it."
            } else {
                "No legacy history found."
            }
        );
        return Ok(());
    }

    let options = MigrationOptions {
        delete_legacy_keys: delete_legacy || ctx.config.migration.delete_legacy_keys,
    };
    let report = migrator.migrate_chat_history(options).await?;
    println!(
        "Migrated {}, skipped {}, errors {}",
        report.migrated,
        report.skipped,
        report.errors.len()
    );
    for error in &report.errors {
        println!("  {}[{}]: {}", error.key, error.record, error.reason);
    }
    if !report.removed_keys.is_empty() {
        println!("Removed legacy keys: {}", report.removed_keys.join(", "));
    }
    Ok(())
}
