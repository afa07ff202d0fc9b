use crate::KeyBuilder;

#[test]
fn test_cluster_level_paths() {
    let kb = KeyBuilder::new("c");

    assert_eq!(kb.cluster(), "/c");
    assert_eq!(kb.cluster_config(), "/c/CONFIGS/CLUSTER/c");
    assert_eq!(kb.participant_config("h_1"), "/c/CONFIGS/PARTICIPANT/h_1");
    assert_eq!(kb.resource_config("db"), "/c/CONFIGS/RESOURCE/db");
    assert_eq!(kb.idealstate("db"), "/c/IDEALSTATES/db");
    assert_eq!(kb.external_view_for_resource("db"), "/c/EXTERNALVIEW/db");
    assert_eq!(kb.live_instance("h_1"), "/c/LIVEINSTANCES/h_1");
    assert_eq!(kb.state_model_def("MasterSlave"), "/c/STATEMODELDEFS/MasterSlave");
    assert_eq!(kb.property_store(), "/c/PROPERTYSTORE");
    assert_eq!(kb.controller_message("m1"), "/c/CONTROLLER/MESSAGES/m1");
}

#[test]
fn test_instance_paths() {
    let kb = KeyBuilder::new("c");

    assert_eq!(kb.message("h_1", "m1"), "/c/INSTANCES/h_1/MESSAGES/m1");
    assert_eq!(
        kb.current_state_for_resource("h_1", "7", "db"),
        "/c/INSTANCES/h_1/CURRENTSTATES/7/db"
    );
    assert_eq!(
        kb.errors_for_resource("h_1", "7", "db"),
        "/c/INSTANCES/h_1/ERRORS/7/db"
    );
    assert_eq!(kb.status_updates("h_1"), "/c/INSTANCES/h_1/STATUSUPDATES");
}

#[test]
fn test_paths_are_pure_functions_of_their_inputs() {
    let a = KeyBuilder::new("c");
    let b = KeyBuilder::new("c");

    assert_eq!(a.messages("h_1"), b.messages("h_1"));
    assert_ne!(a.messages("h_1"), KeyBuilder::new("d").messages("h_1"));
}

#[test]
fn test_cluster_skeleton_covers_controller_subtree() {
    let skeleton = KeyBuilder::new("c").cluster_skeleton();

    assert_eq!(skeleton[0], "/c");
    for p in [
        "/c/CONTROLLER/ERRORS",
        "/c/CONTROLLER/HISTORY",
        "/c/CONTROLLER/MESSAGES",
        "/c/CONTROLLER/STATUSUPDATES",
        "/c/CONFIGS/PARTICIPANT",
    ] {
        assert!(skeleton.iter().any(|s| s == p), "missing {p}");
    }
}
