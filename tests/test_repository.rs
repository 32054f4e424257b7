//! Repository lifecycle against an in-memory SQLite store:
//! create / load / update / delete, cache coherence and plain search.

use namedstore::{
    EntityDescriptor, MemoryCache, NamedEntity, NamedObject, ObjectRepository, RelationalStore,
    SearchOptions, SortDir, SortField, StoreConfig, StoreError,
};
use sqlx::Row;
use std::sync::Arc;

async fn setup() -> (ObjectRepository<NamedObject>, Arc<MemoryCache>, Arc<RelationalStore>) {
    namedstore::infra::init_tracing();
    let store = Arc::new(
        RelationalStore::connect(&StoreConfig::new("sqlite::memory:"))
            .await
            .expect("connect sqlite"),
    );
    let cache = Arc::new(MemoryCache::new());
    let repo = ObjectRepository::new(
        store.clone(),
        cache.clone(),
        EntityDescriptor::plain("widget").unwrap(),
    );
    repo.install_schema().await.expect("install schema");
    (repo, cache, store)
}

#[tokio::test]
async fn test_create_then_load_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, _cache, _store) = setup().await;

    let created = repo.create("  desk lamp  ").await?;
    assert_eq!(created.name(), "desk lamp");
    assert!(created.metadata.is_empty());

    let by_id = repo.load(&created.id().to_string()).await?.expect("load by id");
    assert_eq!(by_id.name(), "desk lamp");
    assert_eq!(by_id.id(), created.id());

    let by_name = repo.load("desk lamp").await?.expect("load by name");
    assert_eq!(by_name.id(), created.id());

    assert!(repo.load("no such lamp").await?.is_none());
    assert!(repo.load("9999").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_install_schema_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, _cache, _store) = setup().await;
    repo.install_schema().await?;
    repo.create("still works").await?;
    Ok(())
}

#[tokio::test]
async fn test_blank_name_is_rejected() {
    let (repo, _cache, _store) = setup().await;
    let err = repo.create("   ").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_duplicate_name_on_create() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, _cache, _store) = setup().await;

    let (a, b) = tokio::join!(repo.create("chair"), repo.create(" chair "));
    let outcomes = [a, b];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    let duplicates = outcomes
        .iter()
        .filter(|r| matches!(r, Err(StoreError::DuplicateName { name }) if name == "chair"))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(duplicates, 1);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_name_on_rename() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, cache, _store) = setup().await;
    repo.create("table").await?;
    let mut stool = repo.create("stool").await?;

    // warm both cache axes for the object being renamed
    repo.load_by_id(stool.id()).await?;
    repo.load("stool").await?;

    stool.name = "table".into();
    let err = repo.update(&mut stool).await.unwrap_err();
    assert!(err.is_duplicate_name());

    // failed rename leaves cache entries and stored name alone
    assert!(cache.contains(&repo.cache_key_for_id(stool.id())).await);
    assert!(cache.contains(&repo.cache_key_for_name("stool")).await);
    assert_eq!(stool.persisted_name(), "stool");
    assert_eq!(repo.load_by_id(stool.id()).await?.unwrap().name(), "stool");
    Ok(())
}

#[tokio::test]
async fn test_load_populates_both_cache_axes_separately() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, cache, _store) = setup().await;
    let obj = repo.create("shelf").await?;
    assert!(cache.is_empty().await);

    repo.load(&obj.id().to_string()).await?;
    assert!(cache.contains(&repo.cache_key_for_id(obj.id())).await);
    assert!(!cache.contains(&repo.cache_key_for_name("shelf")).await);

    repo.load("shelf").await?;
    assert!(cache.contains(&repo.cache_key_for_name("shelf")).await);
    assert_eq!(repo.cache_key_for_name("shelf"), "widget_name_shelf");
    assert_eq!(repo.cache_key_for_id(3), "widget_3");

    // misses are never cached
    repo.load("ghost").await?;
    assert!(!cache.contains(&repo.cache_key_for_name("ghost")).await);
    assert_eq!(cache.len().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_rename_invalidates_cache() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, cache, _store) = setup().await;
    let mut obj = repo.create("alpha").await?;
    let id = obj.id();

    repo.load("alpha").await?;
    repo.load_by_id(id).await?;
    assert_eq!(cache.len().await, 2);

    obj.name = " beta ".into();
    repo.update(&mut obj).await?;
    assert_eq!(obj.name(), "beta");
    assert_eq!(obj.persisted_name(), "beta");
    assert!(!cache.contains(&repo.cache_key_for_id(id)).await);
    assert!(!cache.contains(&repo.cache_key_for_name("alpha")).await);

    assert!(repo.load("alpha").await?.is_none());
    assert_eq!(repo.load_by_id(id).await?.unwrap().name(), "beta");
    assert_eq!(repo.load("beta").await?.unwrap().id(), id);
    Ok(())
}

#[tokio::test]
async fn test_whitespace_only_rename_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, cache, _store) = setup().await;
    let mut obj = repo.create("gamma").await?;
    repo.load_by_id(obj.id()).await?;

    obj.name = "  gamma ".into();
    repo.update(&mut obj).await?;
    assert_eq!(obj.name(), "gamma");
    assert!(cache.contains(&repo.cache_key_for_id(obj.id())).await);
    Ok(())
}

#[tokio::test]
async fn test_metadata_update_is_a_delta_and_keeps_cache() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, cache, store) = setup().await;
    let mut obj = repo.create("sofa").await?;
    obj.set_meta("color", "green");
    obj.set_meta("seats", "3");
    repo.update(&mut obj).await?;

    let mut loaded = repo.load("sofa").await?.unwrap();
    assert_eq!(loaded.get_meta("color"), Some("green"));
    assert_eq!(loaded.get_meta("seats"), Some("3"));

    loaded.set_meta("color", "grey");
    loaded.remove_meta("seats");
    repo.update(&mut loaded).await?;
    assert!(cache.contains(&repo.cache_key_for_name("sofa")).await);

    let reloaded = repo.load_by_id(obj.id()).await?.unwrap();
    assert_eq!(reloaded.get_meta("color"), Some("grey"));
    assert_eq!(reloaded.get_meta("seats"), None);

    let rows: i64 = sqlx::query("SELECT COUNT(*) AS n FROM widget_meta WHERE object = ?1")
        .bind(obj.id())
        .fetch_one(store.pool())
        .await?
        .try_get("n")?;
    assert_eq!(rows, 1);
    Ok(())
}

#[tokio::test]
async fn test_delete_cascades() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, cache, store) = setup().await;
    let mut obj = repo.create("bench").await?;
    obj.set_meta("material", "oak");
    obj.set_meta("legs", "4");
    repo.update(&mut obj).await?;
    repo.load("bench").await?;
    repo.load_by_id(obj.id()).await?;

    repo.delete(&obj).await?;
    assert!(cache.is_empty().await);
    assert!(repo.load_by_id(obj.id()).await?.is_none());
    assert!(repo.load("bench").await?.is_none());

    let rows: i64 = sqlx::query("SELECT COUNT(*) AS n FROM widget_meta WHERE object = ?1")
        .bind(obj.id())
        .fetch_one(store.pool())
        .await?
        .try_get("n")?;
    assert_eq!(rows, 0);
    Ok(())
}

#[tokio::test]
async fn test_ids_are_not_reused_after_delete() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, _cache, _store) = setup().await;
    let first = repo.create("one").await?;
    let second = repo.create("two").await?;
    repo.delete(&second).await?;
    let third = repo.create("three").await?;
    assert!(third.id() > second.id());
    assert!(second.id() > first.id());
    Ok(())
}

#[tokio::test]
async fn test_search_pagination_and_count() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, _cache, _store) = setup().await;
    let mut ids = Vec::new();
    for i in 0..20 {
        ids.push(repo.create(&format!("item-{:02}", i)).await?.id());
    }
    repo.create("unrelated").await?;

    let result = repo
        .search(
            "item",
            SearchOptions {
                offset: 10,
                limit: 5,
                ..SearchOptions::default()
            },
        )
        .await?;
    assert_eq!(result.total_matching, 20);
    assert_eq!(result.page.len(), 5);

    // default order is id descending
    let page_ids: Vec<i64> = result.page.iter().map(|o| o.id()).collect();
    let mut expected: Vec<i64> = ids.iter().rev().copied().collect();
    expected = expected[10..15].to_vec();
    assert_eq!(page_ids, expected);
    Ok(())
}

#[tokio::test]
async fn test_search_without_query_lists_everything() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, _cache, _store) = setup().await;
    for name in ["pear", "apple", "fig"] {
        repo.create(name).await?;
    }

    let result = repo
        .search(
            "",
            SearchOptions {
                sort_field: SortField::Name,
                sort_dir: SortDir::Asc,
                ..SearchOptions::default()
            },
        )
        .await?;
    assert_eq!(result.total_matching, 3);
    let names: Vec<&str> = result.page.iter().map(|o| o.name()).collect();
    assert_eq!(names, vec!["apple", "fig", "pear"]);
    Ok(())
}

#[tokio::test]
async fn test_search_rows_go_through_object_cache() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, cache, _store) = setup().await;
    let obj = repo.create("cached-row").await?;
    assert!(cache.is_empty().await);

    let result = repo.search("cached", SearchOptions::default()).await?;
    assert_eq!(result.page.len(), 1);
    assert!(cache.contains(&repo.cache_key_for_id(obj.id())).await);
    Ok(())
}

#[tokio::test]
async fn test_search_treats_like_metacharacters_literally() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, _cache, _store) = setup().await;
    for name in ["50% off", "500 off", "a_b", "axb"] {
        repo.create(name).await?;
    }

    let percent = repo.search("50%", SearchOptions::default()).await?;
    assert_eq!(percent.total_matching, 1);
    assert_eq!(percent.page[0].name(), "50% off");

    let underscore = repo.search("a_b", SearchOptions::default()).await?;
    assert_eq!(underscore.total_matching, 1);
    assert_eq!(underscore.page[0].name(), "a_b");
    Ok(())
}

#[tokio::test]
async fn test_delete_through_stale_handle_clears_current_name() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, cache, _store) = setup().await;
    let stale = repo.create("lamp").await?;

    let mut fresh = repo.load("lamp").await?.expect("lamp");
    fresh.name = "lantern".into();
    repo.update(&mut fresh).await?;
    assert!(repo.load("lantern").await?.is_some());
    assert!(cache.contains(&repo.cache_key_for_name("lantern")).await);

    repo.delete(&stale).await?;
    assert!(!cache.contains(&repo.cache_key_for_name("lantern")).await);
    assert!(repo.load("lantern").await?.is_none());
    assert!(repo.load_by_id(stale.id()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_rename_through_stale_handle_clears_current_name() -> Result<(), Box<dyn std::error::Error>> {
    let (repo, cache, _store) = setup().await;
    let mut stale = repo.create("kettle").await?;

    let mut fresh = repo.load("kettle").await?.expect("kettle");
    fresh.name = "teapot".into();
    repo.update(&mut fresh).await?;
    repo.load("teapot").await?;

    stale.name = "urn".into();
    repo.update(&mut stale).await?;
    assert!(!cache.contains(&repo.cache_key_for_name("teapot")).await);
    assert!(repo.load("teapot").await?.is_none());
    assert_eq!(repo.load("urn").await?.unwrap().id(), stale.id());
    Ok(())
}

#[tokio::test]
async fn test_name_cache_only_under_stored_spelling() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RelationalStore::connect(&StoreConfig::new("sqlite::memory:")).await?);
    // case-insensitive name column, as with a *_ci collation
    store
        .exec(
            "CREATE TABLE widget (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(255) NOT NULL UNIQUE COLLATE NOCASE
            )",
        )
        .await?;
    let cache = Arc::new(MemoryCache::new());
    let repo = ObjectRepository::new(
        store.clone(),
        cache.clone(),
        EntityDescriptor::plain("widget")?,
    );
    repo.install_schema().await?;

    let mut lamp = repo.create("lamp").await?;
    let found = repo.load("Lamp").await?.expect("case-insensitive match");
    assert_eq!(found.name(), "lamp");
    assert!(!cache.contains(&repo.cache_key_for_name("Lamp")).await);

    repo.load("lamp").await?;
    assert!(cache.contains(&repo.cache_key_for_name("lamp")).await);

    lamp.name = "torch".into();
    repo.update(&mut lamp).await?;
    assert!(cache.is_empty().await);
    assert!(repo.load("Lamp").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_non_duplicate_storage_errors_pass_through() {
    let store = Arc::new(
        RelationalStore::connect(&StoreConfig::new("sqlite::memory:"))
            .await
            .expect("connect sqlite"),
    );
    let repo = ObjectRepository::new(
        store,
        Arc::new(MemoryCache::new()),
        EntityDescriptor::plain("uninstalled").unwrap(),
    );

    let err = repo.create("anything").await.unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)), "got {:?}", err);
    assert!(!err.is_duplicate_name());
}

/// Entity wrapper used to check descriptor-driven construction.
#[derive(Debug)]
struct Product {
    inner: NamedObject,
}

impl Product {
    fn sku(&self) -> String {
        format!("SKU-{}", self.inner.id())
    }
}

impl NamedEntity for Product {
    fn object(&self) -> &NamedObject {
        &self.inner
    }

    fn object_mut(&mut self) -> &mut NamedObject {
        &mut self.inner
    }
}

#[tokio::test]
async fn test_custom_entity_descriptor_and_prefix() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(
        RelationalStore::connect(&StoreConfig::new("sqlite::memory:").with_table_prefix("shop_"))
            .await?,
    );
    let cache = Arc::new(MemoryCache::new());
    let descriptor = EntityDescriptor::<Product>::new("product", |inner| Product { inner })?;
    let repo = ObjectRepository::new(store.clone(), cache.clone(), descriptor);
    repo.install_schema().await?;
    assert_eq!(repo.table(), "shop_product");
    assert_eq!(repo.meta_table(), "shop_product_meta");

    let mut product = repo.create("kettle").await?;
    product.object_mut().set_meta("watts", "2000");
    repo.update(&mut product).await?;

    let loaded = repo.load("kettle").await?.expect("product");
    assert_eq!(loaded.sku(), format!("SKU-{}", product.object().id()));
    assert_eq!(loaded.object().get_meta("watts"), Some("2000"));
    assert!(cache.contains("shop_product_name_kettle").await);
    Ok(())
}
