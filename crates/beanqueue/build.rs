use std::path::PathBuf;

use beanqueue_migrate::{EmbedOptions, Migrator};

fn main() {
    generate_migrations();
}

fn generate_migrations() {
    let out_dir = PathBuf::from(std::env::var_os("OUT_DIR").expect("OUT_DIR is always set"));

    let migrator = Migrator::from_dir("migrations").expect("failed to load migrations directory");
    let embed = migrator.embed(&EmbedOptions {
        crate_path: "::beanqueue_migrate".into(),
        ..EmbedOptions::default()
    });

    std::fs::write(out_dir.join("migrations.rs"), embed).expect("failed to write migrations.rs");
}
