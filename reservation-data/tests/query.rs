//! Query plans compiled and run against in-memory SQLite

#![cfg(feature = "sqlite")]

mod common;

use common::{seed_stations, setup, stations, trips, Station, Trip};
use reservation_data::prelude::*;

fn names(stations: &[Station]) -> Vec<&str> {
    stations.iter().map(|s| s.name.as_str()).collect()
}

/// Four trips: three from Retiro, one from Tigre
async fn seed_trips(factory: &Arc<SqliteFactory>, seeded: &[Station]) -> Vec<Trip> {
    let retiro = seeded[0].id;
    let tigre = seeded[3].id;
    let mut all = vec![
        Trip::new(retiro, 100.0),
        Trip::new(retiro, 250.0),
        Trip::new(retiro, 50.5),
        Trip::new(tigre, 80.0),
    ];
    trips(factory)
        .create_bulk(&mut all, &CancellationToken::new())
        .await
        .unwrap();
    all
}

#[tokio::test]
async fn test_filter_and_order() {
    let factory = setup().await;
    let repo = stations(&factory);
    seed_stations(&repo).await;
    let cancel = CancellationToken::new();

    let central = repo
        .query()
        .filter(col("city").eq("Buenos Aires"))
        .order_by(col("name"))
        .to_list(&cancel)
        .await
        .unwrap();
    assert_eq!(names(&central), ["Constitucion", "Once", "Retiro"]);

    let reversed = repo
        .query()
        .filter(col("active").eq(true))
        .order_by_desc(col("name"))
        .to_list(&cancel)
        .await
        .unwrap();
    assert_eq!(
        names(&reversed),
        ["Tigre", "Retiro", "Once", "Mar del Plata", "Constitucion"]
    );
}

#[tokio::test]
async fn test_null_in_and_like_predicates() {
    let factory = setup().await;
    let repo = stations(&factory);
    seed_stations(&repo).await;
    let cancel = CancellationToken::new();

    let no_city = repo
        .query()
        .filter(col("city").eq(None::<String>))
        .single(&cancel)
        .await
        .unwrap();
    assert_eq!(no_city.name, "Apeadero Km 40");
    assert!(!no_city.active);

    let with_city = repo
        .query()
        .filter(col("city").is_not_null())
        .count(&cancel)
        .await
        .unwrap();
    assert_eq!(with_city, 5);

    let picked = repo
        .query()
        .filter(col("name").in_list(["Retiro", "Once", "Rosario"]))
        .order_by(col("name"))
        .to_list(&cancel)
        .await
        .unwrap();
    assert_eq!(names(&picked), ["Once", "Retiro"]);

    let nothing = repo
        .query()
        .filter(col("name").in_list(Vec::<String>::new()))
        .any(&cancel)
        .await
        .unwrap();
    assert!(!nothing);

    let mar = repo
        .query()
        .filter(col("name").like("Mar%").or(col("name").like("%Km%")))
        .count(&cancel)
        .await
        .unwrap();
    assert_eq!(mar, 2);
}

#[tokio::test]
async fn test_plans_are_immutable() {
    let factory = setup().await;
    let repo = stations(&factory);
    seed_stations(&repo).await;
    let cancel = CancellationToken::new();

    let base = repo.query().order_by(col("name"));
    let active = base.filter(col("active").eq(true));
    let paged = active.take(2);

    assert_eq!(base.count(&cancel).await.unwrap(), 6);
    assert_eq!(active.count(&cancel).await.unwrap(), 5);
    assert_eq!(paged.count(&cancel).await.unwrap(), 2);
    assert_eq!(base.to_list(&cancel).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_pages_partition_the_ordered_result() {
    let factory = setup().await;
    let repo = stations(&factory);
    seed_stations(&repo).await;
    let cancel = CancellationToken::new();

    let ordered = repo.query().order_by(col("name")).then_by(col("id"));
    let everything = ordered.to_list(&cancel).await.unwrap();

    let mut stitched = Vec::new();
    for number in 1..=3 {
        let page = ordered.page(number, 2).to_paged_result(&cancel).await.unwrap();
        assert_eq!(page.total_count, 6);
        assert_eq!(page.skip, (number - 1) * 2);
        assert_eq!(page.take, Some(2));
        assert_eq!(page.page_count(), 3);
        assert_eq!(page.has_more(), number < 3);
        stitched.extend(page.items);
    }
    assert_eq!(stitched, everything);

    let tail = ordered.skip(4).to_list(&cancel).await.unwrap();
    assert_eq!(tail, everything[4..]);
    let past_end = ordered.page(9, 2).to_list(&cancel).await.unwrap();
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn test_paged_result_requires_pagination() {
    let factory = setup().await;
    let repo = stations(&factory);
    let err = repo
        .query()
        .to_paged_result(&CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::InvalidQuery);
}

#[tokio::test]
async fn test_first_and_single() {
    let factory = setup().await;
    let repo = stations(&factory);
    let cancel = CancellationToken::new();

    let err = repo.query().first(&cancel).await.unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::NotFound);
    assert_eq!(repo.query().first_or_default(&cancel).await.unwrap(), None);

    seed_stations(&repo).await;

    let first = repo
        .query()
        .order_by(col("name"))
        .first(&cancel)
        .await
        .unwrap();
    assert_eq!(first.name, "Apeadero Km 40");

    let err = repo
        .query()
        .filter(col("city").eq("Buenos Aires"))
        .single(&cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::MultipleResults);

    let tigre = repo
        .query()
        .filter(col("name").eq("Tigre"))
        .single_or_default(&cancel)
        .await
        .unwrap();
    assert_eq!(tigre.map(|s| s.city), Some(Some("Tigre".to_string())));
}

#[tokio::test]
async fn test_scalar_aggregates() {
    let factory = setup().await;
    let seeded = seed_stations(&stations(&factory)).await;
    seed_trips(&factory, &seeded).await;
    let repo = trips(&factory);
    let cancel = CancellationToken::new();
    let q = repo.query();

    assert_eq!(q.sum::<f64>(col("fare"), &cancel).await.unwrap(), 480.5);
    assert_eq!(q.min::<f64>(col("fare"), &cancel).await.unwrap(), Some(50.5));
    assert_eq!(q.max::<f64>(col("fare"), &cancel).await.unwrap(), Some(250.0));
    assert_eq!(q.average(col("fare"), &cancel).await.unwrap(), Some(120.125));

    let none = q.filter(col("fare").gt(1000.0));
    assert_eq!(none.sum::<f64>(col("fare"), &cancel).await.unwrap(), 0.0);
    assert_eq!(none.max::<f64>(col("fare"), &cancel).await.unwrap(), None);
    assert_eq!(none.average(col("fare"), &cancel).await.unwrap(), None);
    assert!(!none.any(&cancel).await.unwrap());

    let retiro = q.filter(col("station_id").eq(seeded[0].id));
    let summary = retiro
        .aggregate(
            &[
                AggregateDescriptor::count("trips"),
                AggregateDescriptor::sum(col("fare"), "revenue"),
                AggregateDescriptor::max(col("fare"), "top_fare"),
            ],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(summary.get::<i64>("trips").unwrap(), 3);
    assert_eq!(summary.get::<f64>("Revenue").unwrap(), 400.5);
    assert_eq!(summary.try_get::<f64>("top_fare"), Some(250.0));
}

#[tokio::test]
async fn test_aggregate_over_a_page() {
    let factory = setup().await;
    let seeded = seed_stations(&stations(&factory)).await;
    seed_trips(&factory, &seeded).await;
    let cancel = CancellationToken::new();

    let cheapest_two = trips(&factory).query().order_by(col("fare")).take(2);
    let total = cheapest_two.sum::<f64>(col("fare"), &cancel).await.unwrap();
    assert_eq!(total, 130.5);
}

#[tokio::test]
async fn test_grouped_projection_with_having() {
    let factory = setup().await;
    let repo = stations(&factory);
    seed_stations(&repo).await;
    let cancel = CancellationToken::new();

    let grouped = repo
        .query()
        .group_by([col("city")])
        .having(count_all().gt(1_i64))
        .select([("city", col("city")), ("stations", count_all())])
        .to_list(&cancel)
        .await
        .unwrap();
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[0].get_as::<String>("city").unwrap(), "Buenos Aires");
    assert_eq!(grouped[0].get_as::<i64>("stations").unwrap(), 3);

    let per_city = repo
        .query()
        .group_by([col("city")])
        .select([("city", col("city")), ("stations", count_all())])
        .order_by(col("city"))
        .to_list(&cancel)
        .await
        .unwrap();
    assert_eq!(per_city.len(), 4);
    assert_eq!(per_city[0].get_as::<Option<String>>("city").unwrap(), None);
}

#[tokio::test]
async fn test_join_projects_both_sides() {
    let factory = setup().await;
    let seeded = seed_stations(&stations(&factory)).await;
    seed_trips(&factory, &seeded).await;
    let cancel = CancellationToken::new();

    let rows = trips(&factory)
        .query()
        .join::<Station>("s", col("station_id").eq(field("s", "id")))
        .filter(field("s", "city").eq("Tigre").or(col("fare").lt(60.0)))
        .select([("fare", col("fare")), ("station", field("s", "name"))])
        .order_by(col("fare"))
        .to_list(&cancel)
        .await
        .unwrap();

    let pairs: Vec<(f64, String)> = rows
        .iter()
        .map(|r| (r.get_as("fare").unwrap(), r.get_as("station").unwrap()))
        .collect();
    assert_eq!(
        pairs,
        [(50.5, "Retiro".to_string()), (80.0, "Tigre".to_string())]
    );

    let err = trips(&factory)
        .query()
        .join::<Station>("s", col("station_id").eq(field("s", "id")))
        .to_list(&cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::InvalidQuery);
}

#[tokio::test]
async fn test_left_join_keeps_unmatched_rows() {
    let factory = setup().await;
    let seeded = seed_stations(&stations(&factory)).await;
    seed_trips(&factory, &seeded).await;
    let cancel = CancellationToken::new();

    let idle = stations(&factory)
        .query()
        .left_join::<Trip>("tr", field("tr", "station_id").eq(col("id")))
        .filter(field("tr", "id").is_null())
        .select([("name", col("name"))])
        .count(&cancel)
        .await
        .unwrap();
    assert_eq!(idle, 4);
}

#[tokio::test]
async fn test_distinct_projection() {
    let factory = setup().await;
    let repo = stations(&factory);
    seed_stations(&repo).await;
    let cancel = CancellationToken::new();

    let cities = repo.query().select([("city", col("city"))]).distinct();
    assert_eq!(cities.to_list(&cancel).await.unwrap().len(), 4);
    assert_eq!(cities.count(&cancel).await.unwrap(), 4);
}

#[tokio::test]
async fn test_count_agrees_with_list_for_projections() {
    let factory = setup().await;
    let repo = stations(&factory);
    seed_stations(&repo).await;
    let cancel = CancellationToken::new();

    let totals = repo.query().select([("n", count_all())]);
    let rows = totals.to_list(&cancel).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_as::<i64>("n").unwrap(), 6);
    assert_eq!(totals.count(&cancel).await.unwrap(), 1);

    let names_only = repo.query().select([("name", col("name"))]);
    assert_eq!(names_only.count(&cancel).await.unwrap(), 6);
}

#[tokio::test]
async fn test_invalid_plans_fail_before_the_store() {
    let factory = setup().await;
    let repo = stations(&factory);
    let cancel = CancellationToken::new();

    let unknown = repo.query().filter(col("platform").eq(3_i64));
    assert_eq!(
        unknown.to_list(&cancel).await.unwrap_err().kind,
        RepositoryErrorKind::InvalidQuery
    );
    assert!(unknown.to_command().is_err());

    let ungrouped = repo.query().having(count_all().gt(1_i64));
    assert_eq!(
        ungrouped.count(&cancel).await.unwrap_err().kind,
        RepositoryErrorKind::InvalidQuery
    );
}

#[tokio::test]
async fn test_cancelled_query() {
    let factory = setup().await;
    let repo = stations(&factory);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = repo.query().to_list(&cancel).await.unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn test_blocking_terminals() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let factory = rt.block_on(setup());
    let repo = stations(&factory);
    rt.block_on(seed_stations(&repo));

    let query = repo.query().filter(col("city").eq("Buenos Aires"));
    let blocking = query.blocking(rt.handle().clone());
    assert_eq!(blocking.count().unwrap(), 3);
    assert!(blocking.any().unwrap());
    assert_eq!(
        blocking.first_or_default().unwrap().map(|s| s.city),
        Some(Some("Buenos Aires".to_string()))
    );

    let paged = query.order_by(col("name")).page(2, 2);
    let page = paged.blocking(rt.handle().clone()).to_paged_result().unwrap();
    assert_eq!(names(&page.items), ["Retiro"]);
    assert_eq!(page.total_count, 3);
    assert!(!page.has_more());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = query
        .blocking(rt.handle().clone())
        .with_cancellation(cancel)
        .to_list()
        .unwrap_err();
    assert!(err.is_cancelled());
}
