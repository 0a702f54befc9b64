use kube::CustomResourceExt;
use secrets_store_csi_driver_operator::controller::v1::crd::cluster_csi_driver::ClusterCSIDriver;

fn main() -> Result<(), serde_yaml::Error> {
    let crd_yaml = serde_yaml::to_string(&ClusterCSIDriver::crd())?;
    print!("{crd_yaml}");
    Ok(())
}
