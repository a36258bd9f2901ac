use canopy_k8s::crd::Cluster;
use kube::CustomResourceExt;

fn main() {
    print!("{}", serde_yaml::to_string(&Cluster::crd()).unwrap());
}
