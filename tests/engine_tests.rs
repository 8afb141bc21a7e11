use rasterflow::data::{FeatureCollection, GeoJsonFeature, GeoJsonGeometry};
use rasterflow::graph::{GraphError, NodeData};
use rasterflow::prelude::*;
use serde_json::json;

/// Integration tests driving whole graphs through the executor
#[cfg(test)]
mod engine_tests {
    use super::*;
    use rasterflow::spatial::KernelError;

    /// Project covering tiles (2, 2)..(3, 3) at zoom 2
    fn small_project() -> ProjectSettings {
        ProjectSettings::new(Extent::new(0.0, -15_000_000.0, 15_000_000.0, 0.0), 2)
    }

    /// Polygon covering the x = 2 column of the small project
    fn western_half() -> GeoJsonFeature {
        GeoJsonFeature::new(GeoJsonGeometry::Polygon {
            coordinates: vec![vec![
                [0.0, -20_000_000.0],
                [8_000_000.0, -20_000_000.0],
                [8_000_000.0, 0.0],
                [0.0, 0.0],
                [0.0, -20_000_000.0],
            ]],
        })
    }

    fn features() -> MemoryFeatureSource {
        MemoryFeatureSource::new()
            .with_layer("greenspace_site", FeatureCollection::new(vec![western_half()]))
            .with_layer("boundaries", FeatureCollection::new(Vec::new()))
    }

    fn executor_with(features: Arc<MemoryFeatureSource>, layers: Arc<LayerStore>) -> Executor {
        let config = EngineConfig::default()
            .with_project(small_project())
            .with_workers(2);
        Executor::new(&config, features, layers).unwrap()
    }

    fn executor() -> Executor {
        executor_with(Arc::new(features()), Arc::new(LayerStore::new()))
    }

    fn data(pairs: &[(&str, serde_json::Value)]) -> NodeData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn constant(value: f64) -> NodeData {
        data(&[("value", json!(value))])
    }

    fn raster(exec: &Executor, node: NodeId, socket: &str) -> Arc<TileGrid> {
        exec.output(node, socket)
            .and_then(Value::as_raster)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_green_space_area_and_layer() {
        let layers = Arc::new(LayerStore::new());
        let mut exec = executor_with(Arc::new(features()), layers.clone());

        let green = exec.add_node("Green spaces", NodeData::new()).unwrap();
        let area = exec.add_node("Area", NodeData::new()).unwrap();
        let layer = exec
            .add_node("Map layer", data(&[("name", json!("Green area"))]))
            .unwrap();
        exec.connect(Connection::new(green, "Green space", area, "in")).unwrap();
        exec.connect(Connection::new(area, "out", layer, "in")).unwrap();
        exec.connect(Connection::new(area, "unit", layer, "props")).unwrap();

        exec.process().await;
        assert!(exec.is_settled());

        // Only the connected green space output is produced
        let outputs = exec.outputs(green).unwrap();
        assert_eq!(outputs.keys().collect::<Vec<_>>(), vec!["Green space"]);

        let grid = raster(&exec, area, "out");
        assert!(grid.value_at(2, 2) > 0.0);
        assert_eq!(grid.value_at(3, 2), 0.0);

        let published = layers.get(layer).unwrap();
        assert_eq!(published.name, "Green area");
        assert_eq!(
            published.grid.properties().get("unit").map(String::as_str),
            Some("km²")
        );
    }

    #[tokio::test]
    async fn test_edit_leaves_sibling_branch_alone() {
        let mut exec = executor();
        let a = exec.add_node("Numeric constant", constant(2.0)).unwrap();
        let b = exec.add_node("Numeric constant", constant(3.0)).unwrap();
        let left = exec.add_node("Negate", NodeData::new()).unwrap();
        let right = exec.add_node("Negate", NodeData::new()).unwrap();
        exec.connect(Connection::new(a, "out", left, "in")).unwrap();
        exec.connect(Connection::new(b, "out", right, "in")).unwrap();
        exec.process().await;

        let events = exec.subscribe();
        exec.set_data(a, constant(5.0)).unwrap();
        assert_eq!(exec.state(left), Some(NodeState::Pending));
        assert_eq!(exec.state(right), Some(NodeState::Ready));

        exec.process().await;
        let touched: Vec<NodeId> = events
            .try_iter()
            .map(|event| match event {
                NodeEvent::Ready(node) => node,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(touched, vec![a, left]);
        assert_eq!(exec.output(left, "out").and_then(Value::as_number), Some(-5.0));
        assert_eq!(exec.output(right, "out").and_then(Value::as_number), Some(-3.0));
    }

    #[tokio::test]
    async fn test_superseded_evaluation_is_discarded() {
        let mut exec = executor();
        let node = exec.add_node("Numeric constant", constant(1.0)).unwrap();

        assert_eq!(exec.schedule(), 1);
        exec.set_data(node, constant(7.0)).unwrap();
        assert_eq!(exec.schedule(), 1);
        assert_eq!(exec.in_flight(), 2);

        let mut completions = vec![
            exec.next_completion().await.unwrap(),
            exec.next_completion().await.unwrap(),
        ];
        completions.sort_by_key(|c| std::cmp::Reverse(c.generation));

        // Newest first, then the stale one arrives late
        let stale = completions.pop().unwrap();
        let fresh = completions.pop().unwrap();
        assert_eq!(exec.apply(fresh), NodeEvent::Ready(node));
        assert_eq!(
            exec.apply(stale),
            NodeEvent::Discarded {
                node,
                generation: 1
            }
        );
        assert_eq!(exec.output(node, "out").and_then(Value::as_number), Some(7.0));
    }

    #[tokio::test]
    async fn test_connecting_to_an_evaluating_source_restarts_it() {
        let mut exec = executor();
        let events = exec.subscribe();
        let boundary = exec.add_node("Boundaries", NodeData::new()).unwrap();
        assert_eq!(exec.schedule(), 1);
        assert_eq!(exec.state(boundary), Some(NodeState::Evaluating));

        // The running evaluation was started with no connected outputs
        let complement = exec.add_node("Complement", NodeData::new()).unwrap();
        exec.connect(Connection::new(boundary, "out", complement, "in")).unwrap();
        assert_eq!(exec.state(boundary), Some(NodeState::Pending));

        exec.process().await;
        assert_eq!(exec.state(boundary), Some(NodeState::Ready));
        assert!(exec.output(boundary, "out").is_some());
        assert_eq!(exec.state(complement), Some(NodeState::Ready));

        let grid = raster(&exec, complement, "out");
        assert_eq!(grid.value_at(2, 2), 1.0);
        assert!(events
            .try_iter()
            .any(|e| matches!(e, NodeEvent::Discarded { node, .. } if node == boundary)));
    }

    #[tokio::test]
    async fn test_connecting_an_already_requested_output_keeps_the_evaluation() {
        let mut exec = executor();
        let boundary = exec.add_node("Boundaries", NodeData::new()).unwrap();
        let first = exec.add_node("Complement", NodeData::new()).unwrap();
        exec.connect(Connection::new(boundary, "out", first, "in")).unwrap();
        assert_eq!(exec.schedule(), 1);

        let second = exec.add_node("Complement", NodeData::new()).unwrap();
        exec.connect(Connection::new(boundary, "out", second, "in")).unwrap();
        assert_eq!(exec.state(boundary), Some(NodeState::Evaluating));

        exec.process().await;
        assert_eq!(exec.state(first), Some(NodeState::Ready));
        assert_eq!(exec.state(second), Some(NodeState::Ready));
    }

    #[tokio::test]
    async fn test_removed_layer_node_is_not_republished() {
        let layers = Arc::new(LayerStore::new());
        let mut exec = executor_with(Arc::new(features()), layers.clone());
        let boundary = exec.add_node("Boundaries", NodeData::new()).unwrap();
        let layer = exec
            .add_node("Map layer", data(&[("name", json!("x"))]))
            .unwrap();
        exec.connect(Connection::new(boundary, "out", layer, "in")).unwrap();
        exec.process().await;
        assert_eq!(layers.get(layer).map(|l| l.name), Some("x".to_string()));

        exec.set_data(layer, data(&[("name", json!("y"))])).unwrap();
        assert_eq!(exec.schedule(), 1);
        assert_eq!(exec.state(layer), Some(NodeState::Evaluating));
        exec.remove_node(layer).unwrap();
        assert!(layers.is_empty());

        exec.process().await;
        assert!(layers.get(layer).is_none());
        assert!(layers.is_empty());
    }

    #[tokio::test]
    async fn test_superseded_layer_evaluation_never_publishes() {
        let layers = Arc::new(LayerStore::new());
        let mut exec = executor_with(Arc::new(features()), layers.clone());
        let boundary = exec.add_node("Boundaries", NodeData::new()).unwrap();
        let layer = exec
            .add_node("Map layer", data(&[("name", json!("first"))]))
            .unwrap();
        exec.connect(Connection::new(boundary, "out", layer, "in")).unwrap();
        exec.process().await;

        let events = exec.subscribe();
        exec.set_data(layer, data(&[("name", json!("second"))])).unwrap();
        assert_eq!(exec.schedule(), 1);
        exec.set_data(layer, data(&[("name", json!("third"))])).unwrap();

        // Apply the stale evaluation first; it must not touch the sink
        assert_eq!(exec.schedule(), 1);
        let mut completions = vec![
            exec.next_completion().await.unwrap(),
            exec.next_completion().await.unwrap(),
        ];
        completions.sort_by_key(|c| c.generation);
        let fresh = completions.pop().unwrap();
        let stale = completions.pop().unwrap();

        assert!(matches!(exec.apply(stale), NodeEvent::Discarded { .. }));
        assert_eq!(layers.get(layer).map(|l| l.name), Some("first".to_string()));
        assert_eq!(exec.apply(fresh), NodeEvent::Ready(layer));
        assert_eq!(layers.get(layer).map(|l| l.name), Some("third".to_string()));
        assert_eq!(events.try_iter().count(), 2);
    }

    #[tokio::test]
    async fn test_errored_layer_node_is_withdrawn() {
        let layers = Arc::new(LayerStore::new());
        let mut exec = executor_with(Arc::new(features()), layers.clone());
        let boundary = exec.add_node("Boundaries", NodeData::new()).unwrap();
        let layer = exec.add_node("Map layer", NodeData::new()).unwrap();
        let link = Connection::new(boundary, "out", layer, "in");
        exec.connect(link.clone()).unwrap();
        exec.process().await;
        assert_eq!(layers.len(), 1);

        assert!(exec.disconnect(&link));
        exec.process().await;
        assert_eq!(exec.error(layer).map(|e| e.to_string()).as_deref(), Some("No input"));
        assert!(layers.is_empty());
    }

    #[tokio::test]
    async fn test_errored_upstream_reads_as_missing_input() {
        let mut exec = executor();
        let bad = exec
            .add_node("Numeric constant", data(&[("value", json!("lots"))]))
            .unwrap();
        let negate = exec.add_node("Negate", NodeData::new()).unwrap();
        exec.connect(Connection::new(bad, "out", negate, "in")).unwrap_err();

        // The misconfigured node has no sockets; wire a good producer instead and break it later
        let good = exec.add_node("Numeric constant", constant(1.0)).unwrap();
        exec.connect(Connection::new(good, "out", negate, "in")).unwrap();
        exec.set_data(good, data(&[("value", json!("lots"))])).unwrap();

        exec.process().await;
        assert_eq!(exec.state(bad), Some(NodeState::Errored));
        assert_eq!(exec.state(good), Some(NodeState::Errored));
        assert_eq!(exec.state(negate), Some(NodeState::Errored));
        assert_eq!(exec.error(negate).map(|e| e.to_string()).as_deref(), Some("No input"));
    }

    #[tokio::test]
    async fn test_cycles_are_rejected() {
        let mut exec = executor();
        let first = exec.add_node("Negate", NodeData::new()).unwrap();
        let second = exec.add_node("Negate", NodeData::new()).unwrap();
        exec.connect(Connection::new(first, "out", second, "in")).unwrap();

        let back = Connection::new(second, "out", first, "in");
        assert_eq!(exec.connect(back.clone()), Err(GraphError::Cycle(back)));
        assert_eq!(exec.graph().connections().len(), 1);
    }

    #[tokio::test]
    async fn test_distance_map_runs_on_the_pool() {
        let mut exec = executor();
        let green = exec.add_node("Green spaces", NodeData::new()).unwrap();
        let distance = exec.add_node("Distance map", NodeData::new()).unwrap();
        exec.connect(Connection::new(green, "Green space", distance, "in")).unwrap();

        exec.process().await;
        let grid = raster(&exec, distance, "out");
        assert_eq!(grid.value_at(2, 2), 0.0);
        assert!(grid.value_at(3, 2) > 0.0);
        assert_eq!(
            exec.output(distance, "unit").and_then(Value::as_property).map(|p| p.unit.as_str()),
            Some("m")
        );
    }

    #[tokio::test]
    async fn test_distance_without_seeds_errors() {
        let mut exec = executor();
        let boundary = exec.add_node("Boundaries", NodeData::new()).unwrap();
        let distance = exec.add_node("Distance map", NodeData::new()).unwrap();
        exec.connect(Connection::new(boundary, "out", distance, "in")).unwrap();

        exec.process().await;
        assert_eq!(exec.state(boundary), Some(NodeState::Ready));
        assert_eq!(
            exec.error(distance),
            Some(&ComponentError::Kernel(KernelError::NoSeedPoints))
        );
    }

    #[tokio::test]
    async fn test_unchanged_source_output_is_memoized_downstream() {
        let source = Arc::new(features());
        let mut exec = executor_with(source.clone(), Arc::new(LayerStore::new()));
        let green = exec.add_node("Green spaces", NodeData::new()).unwrap();
        let area = exec.add_node("Area", NodeData::new()).unwrap();
        exec.connect(Connection::new(green, "Green space", area, "in")).unwrap();
        exec.process().await;
        let before = raster(&exec, area, "out");

        // Re-evaluation of the source hits its cache and returns the same grid
        exec.set_data(green, data(&[("note", json!("edited"))])).unwrap();
        let events = exec.subscribe();
        exec.process().await;

        assert_eq!(source.fetch_count(), 1);
        assert!(Arc::ptr_eq(&before, &raster(&exec, area, "out")));
        assert_eq!(events.try_iter().count(), 2);
    }

    #[tokio::test]
    async fn test_expression_parse_error_settles_the_node() {
        let mut exec = executor();
        let node = exec
            .add_node("Expression", data(&[("expression", json!("a + "))]))
            .unwrap();
        exec.process().await;
        assert_eq!(exec.state(node), Some(NodeState::Errored));
        assert!(matches!(exec.error(node), Some(ComponentError::Config(_))));
    }

    #[tokio::test]
    async fn test_expression_over_numbers() {
        let mut exec = executor();
        let a = exec.add_node("Numeric constant", constant(3.0)).unwrap();
        let b = exec.add_node("Numeric constant", constant(4.0)).unwrap();
        let expr = exec
            .add_node("Expression", data(&[("expression", json!("sqrt(a^2 + b^2)"))]))
            .unwrap();
        exec.connect(Connection::new(a, "out", expr, "a")).unwrap();
        exec.connect(Connection::new(b, "out", expr, "b")).unwrap();

        exec.process().await;
        assert_eq!(exec.output(expr, "out").and_then(Value::as_number), Some(5.0));
    }

    #[tokio::test]
    async fn test_document_round_trip() {
        let mut exec = executor();
        let a = exec.add_node("Numeric constant", constant(6.0)).unwrap();
        let b = exec.add_node("Numeric constant", constant(1.5)).unwrap();
        let sum = exec.add_node("Sum", NodeData::new()).unwrap();
        let raster_a = exec.add_node("Number to numeric dataset", NodeData::new()).unwrap();
        let raster_b = exec.add_node("Number to numeric dataset", NodeData::new()).unwrap();
        exec.connect(Connection::new(a, "out", raster_a, "in")).unwrap();
        exec.connect(Connection::new(b, "out", raster_b, "in")).unwrap();
        exec.connect(Connection::new(raster_a, "out", sum, "in")).unwrap();
        exec.connect(Connection::new(raster_b, "out", sum, "in")).unwrap();

        let json = exec.to_document().to_json().unwrap();
        let document = GraphDocument::from_json(&json).unwrap();
        assert_eq!(document.nodes.len(), 5);

        let mut restored = executor();
        restored.load_document(&document).unwrap();
        assert_eq!(restored.graph().connections().len(), 4);
        restored.process().await;

        let grid = raster(&restored, sum, "out");
        assert_eq!(grid.value_at(2, 2), 7.5);
        assert_eq!(grid.value_at(3, 3), 7.5);
    }

    #[tokio::test]
    async fn test_newer_document_version_is_rejected() {
        let mut exec = executor();
        let mut document = exec.to_document();
        document.version += 1;
        assert!(matches!(
            exec.load_document(&document),
            Err(EngineError::Graph(GraphError::UnsupportedVersion(_)))
        ));
    }

    #[tokio::test]
    async fn test_removing_a_layer_node_withdraws_it() {
        let layers = Arc::new(LayerStore::new());
        let mut exec = executor_with(Arc::new(features()), layers.clone());
        let green = exec.add_node("Green spaces", NodeData::new()).unwrap();
        let layer = exec.add_node("Map layer", NodeData::new()).unwrap();
        exec.connect(Connection::new(green, "Green space", layer, "in")).unwrap();
        exec.process().await;

        assert_eq!(layers.get(layer).map(|l| l.name), Some("OS Green space".to_string()));
        exec.remove_node(layer).unwrap();
        assert!(layers.is_empty());
        assert!(exec.state(layer).is_none());
    }

    #[tokio::test]
    async fn test_every_component_is_available() {
        let exec = executor();
        let library = exec.library();
        assert_eq!(library.len(), 37);
        for tag in ["Land cover", "Union", "Expression", "Bar chart", "Rescale"] {
            assert!(library.get(tag).is_some(), "missing {}", tag);
        }
    }
}
