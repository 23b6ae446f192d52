use app_lock::config::CatalogMode;
use app_lock::engine::catalog::{InMemoryCatalog, PackageCatalog, PackageInfo};
use app_lock::models::UserId;

#[test]
fn open_mode_resolves_unknown_packages_as_user_apps() {
    let catalog = InMemoryCatalog::new(CatalogMode::Open);

    let info = catalog
        .resolve(UserId(0), "com.example.app")
        .expect("open mode resolves");
    assert_eq!(info, PackageInfo::user_app("com.example.app"));
    assert!(!info.system);
}

#[test]
fn strict_mode_only_resolves_recorded_packages() {
    let catalog = InMemoryCatalog::new(CatalogMode::Strict);
    assert!(catalog.resolve(UserId(0), "com.example.app").is_none());

    catalog.record_installed(
        UserId(0),
        PackageInfo {
            package_name: "com.example.app".into(),
            label: "Example".into(),
            system: false,
        },
    );

    let info = catalog.resolve(UserId(0), "com.example.app").expect("installed");
    assert_eq!(info.label, "Example");
    assert!(
        catalog.resolve(UserId(10), "com.example.app").is_none(),
        "installs are per user"
    );

    catalog.record_removed(UserId(0), "com.example.app");
    assert!(catalog.resolve(UserId(0), "com.example.app").is_none());
}

#[test]
fn recorded_info_wins_over_open_default() {
    let catalog = InMemoryCatalog::new(CatalogMode::Open);
    catalog.record_installed(
        UserId(0),
        PackageInfo {
            package_name: "com.android.settings".into(),
            label: "Settings".into(),
            system: true,
        },
    );

    let info = catalog
        .resolve(UserId(0), "com.android.settings")
        .expect("installed");
    assert!(info.system);
    assert_eq!(info.label, "Settings");
}
